// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Host Command Infrastructure Module
//!
//! [`ShellCommandExecutor`] runs host commands as child processes;
//! [`RecordingCommandExecutor`] records them for tests.

pub mod shell;

pub use shell::ShellCommandExecutor;

// Re-export RecordingCommandExecutor for testing
pub use mock::RecordingCommandExecutor;

mod mock {
    use crate::domain::command::{CommandError, CommandExecutor, CommandKind, HostCommand};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Executor that records every command and never touches the host
    #[derive(Default)]
    pub struct RecordingCommandExecutor {
        executed: Mutex<Vec<HostCommand>>,
        failing: Mutex<HashSet<CommandKind>>,
    }

    impl RecordingCommandExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every command of `kind` fail (still recorded)
        pub fn set_failing(&self, kind: CommandKind, failing: bool) {
            let mut set = self.failing.lock();
            if failing {
                set.insert(kind);
            } else {
                set.remove(&kind);
            }
        }

        pub fn executed(&self) -> Vec<HostCommand> {
            self.executed.lock().clone()
        }

        pub fn count(&self, kind: CommandKind) -> usize {
            self.executed
                .lock()
                .iter()
                .filter(|c| c.kind() == kind)
                .count()
        }
    }

    #[async_trait]
    impl CommandExecutor for RecordingCommandExecutor {
        async fn execute(&self, command: &HostCommand) -> Result<(), CommandError> {
            self.executed.lock().push(command.clone());
            if self.failing.lock().contains(&command.kind()) {
                return Err(CommandError::NonZeroExit {
                    command: command.to_string(),
                    status: "exit status: 32".to_string(),
                    stderr: "simulated failure".to_string(),
                });
            }
            Ok(())
        }
    }
}
