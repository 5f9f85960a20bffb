
mod read_and_create_tests;
