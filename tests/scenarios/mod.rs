//! Scenario-based tests for mlpipe

mod end_to_end;
mod failure_handling;
mod schedule_triggers;
mod step_ordering;
mod step_testing;
mod yaml_config;
