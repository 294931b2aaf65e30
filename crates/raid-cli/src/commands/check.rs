//! `raid check` — sweep the catalog for structural invariant violations
//! (SPEC_FULL §4.6's `Catalog::verify_invariants` addition).

use anyhow::{bail, Result};
use clap::Args as ClapArgs;
use raid_core::catalog::Catalog;

#[derive(ClapArgs, Clone)]
pub struct Args {}

pub async fn execute(catalog: &dyn Catalog, _args: &Args) -> Result<()> {
    let violations = catalog.verify_invariants().await?;
    if violations.is_empty() {
        println!("catalog consistent: no invariant violations found");
        return Ok(());
    }

    for violation in &violations {
        println!("violation: {}", violation.0);
    }
    bail!("{} invariant violation(s) found", violations.len());
}
