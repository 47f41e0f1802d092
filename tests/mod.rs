mod bootstrap_tests;
mod common;
mod live_tests;
mod producer_tests;
