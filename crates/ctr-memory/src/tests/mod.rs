mod cache;
mod helpers;
