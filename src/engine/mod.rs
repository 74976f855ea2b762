// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Plan execution: the supervisor, its worker launchers and the commit step.

pub mod commit;
pub mod launcher;
pub mod protocol;
mod supervisor;
pub mod worker;

pub use commit::{commit, CommitSummary};
pub use launcher::{InProcessLauncher, ProcessLauncher};
pub use protocol::{WorkerResult, WorkerSpec, WorkerStatus};
pub use supervisor::{
    RunSummary, ShutdownHandle, Supervisor, EXIT_ARG_ERROR, EXIT_CANCELLED, EXIT_FAILURE,
    EXIT_OK, EXIT_QC_FAILURE,
};
pub use worker::{run_spec_file, Worker};
