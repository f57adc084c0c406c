// Scenario tests for the delivery core
// Cross-module flows driven against an in-process mock of the server API

mod support;

mod auth_tests;
mod media_tests;
mod senders_tests;
