mod support;
mod txt_tests;
