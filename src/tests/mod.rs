//! Cross-module tests driving the readers, aggregator and coordinator together.

mod integration_tests;
