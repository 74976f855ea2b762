// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use clap::Parser;

use apero::cli::{dispatch, Cli};
use apero::engine::{EXIT_ARG_ERROR, EXIT_FAILURE, EXIT_OK};

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { EXIT_ARG_ERROR } else { EXIT_OK };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}
