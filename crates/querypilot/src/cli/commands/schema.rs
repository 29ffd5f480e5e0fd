use anyhow::Result;
use clap::Args;

use crate::models::{Envelope, output_json_schema};

use super::print_envelope;

#[derive(Debug, Clone, Args)]
pub struct SchemaArgs {}

pub fn run(_args: &SchemaArgs) -> Result<()> {
    print_envelope(&Envelope::success("schema", output_json_schema()))
}
