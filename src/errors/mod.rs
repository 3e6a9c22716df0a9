// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod execution;
mod graph;
mod storage;

pub use execution::ExecutionError;
pub use graph::{GraphError, ValidationError};
pub use storage::StorageError;
