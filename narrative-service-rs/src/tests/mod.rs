
mod generator_tests;
