//! Built-in `uses:` actions

use crate::runner::{Invocation, RunnerError};
use std::collections::BTreeMap;

/// Actions the runner knows how to perform natively
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinAction {
    /// `actions/checkout@*`
    Checkout,
    /// `dtolnay/rust-toolchain@<rev>`; the rev doubles as the toolchain
    DtolnayToolchain { rev: String },
    /// `actions-rs/toolchain@*`
    ActionsRsToolchain,
}

impl BuiltinAction {
    /// Resolve an action reference such as `actions/checkout@v4`
    pub fn parse(reference: &str) -> Result<Self, RunnerError> {
        let (name, rev) = reference.split_once('@').unwrap_or((reference, ""));
        match name {
            "actions/checkout" => Ok(BuiltinAction::Checkout),
            "dtolnay/rust-toolchain" => Ok(BuiltinAction::DtolnayToolchain {
                rev: rev.to_string(),
            }),
            "actions-rs/toolchain" => Ok(BuiltinAction::ActionsRsToolchain),
            _ => Err(RunnerError::UnsupportedAction(reference.to_string())),
        }
    }

    /// Turn the action and its rendered `with:` inputs into an invocation
    ///
    /// `sha` is the commit of the triggering event, used when checkout has no `ref` input.
    pub fn invocation(
        &self,
        with: &BTreeMap<String, String>,
        sha: Option<&str>,
    ) -> Result<Invocation, RunnerError> {
        match self {
            BuiltinAction::Checkout => Ok(Invocation::Checkout {
                target: with
                    .get("ref")
                    .filter(|r| !r.is_empty())
                    .cloned()
                    .or_else(|| sha.map(str::to_string)),
            }),
            BuiltinAction::DtolnayToolchain { rev } => {
                let toolchain = match with.get("toolchain").filter(|t| !t.is_empty()) {
                    Some(toolchain) => toolchain.clone(),
                    None if !rev.is_empty() && rev != "master" && rev != "v1" => rev.clone(),
                    None => {
                        return Err(RunnerError::setup(
                            "dtolnay/rust-toolchain needs a 'toolchain' input",
                        ))
                    }
                };
                Ok(Invocation::Toolchain {
                    toolchain,
                    components: components(with),
                })
            }
            BuiltinAction::ActionsRsToolchain => {
                let toolchain = with
                    .get("toolchain")
                    .filter(|t| !t.is_empty())
                    .cloned()
                    .ok_or_else(|| RunnerError::setup("actions-rs/toolchain needs a 'toolchain' input"))?;
                Ok(Invocation::Toolchain {
                    toolchain,
                    components: components(with),
                })
            }
        }
    }
}

fn components(with: &BTreeMap<String, String>) -> Vec<String> {
    with.get("components")
        .map(|list| {
            list.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
