mod common;

mod lifecycle;
mod reconcile;
