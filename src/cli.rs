//! CLI domain: parse, route and output only.
//! No orchestration here; the route table dispatches to the transform API.

mod input;
mod output;
mod parse;
mod route;

pub use input::{parse_items, read_items};
pub use output::{map_error, render_error};
pub use parse::{Cli, Commands, GenerationArgs, ObjectArgs, PromptArgs, RunArgs};
pub use route::RunContext;
