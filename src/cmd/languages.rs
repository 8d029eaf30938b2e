//! The `languages` subcommand.

use clap::Args;

use crate::{cmd::ServiceOpts, model::DEFAULT_LANGUAGE, prelude::*};

/// Languages command line arguments.
#[derive(Debug, Args)]
pub struct LanguagesOpts {
    #[clap(flatten)]
    pub service: ServiceOpts,
}

/// The `languages` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_languages(opts: &LanguagesOpts) -> Result<()> {
    let orchestrator = opts.service.orchestrator()?;
    orchestrator.load_catalog().await?;
    for language in orchestrator.languages() {
        let marker = if language.code == DEFAULT_LANGUAGE {
            " *"
        } else {
            ""
        };
        println!("{language}{marker}");
    }
    Ok(())
}
