pub mod lsp_client;

use std::process::Command;

/// The smithy-ls binary under test.
#[allow(dead_code)]
pub fn smithy_ls() -> Command {
    Command::new(env!("CARGO_BIN_EXE_smithy-ls"))
}
