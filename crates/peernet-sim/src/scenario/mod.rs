//! Scenario DSL: typed commands and the line parser.

mod command;
mod parser;

pub use command::{
    Command, CreateActivities, CreateIdentities, CreateServers, GroupRange, ParsedCommand,
    TestQuery, TestQueryActivity,
};
pub use parser::{parse_scenario, ScenarioError, ANY, NO_LOCATION};
