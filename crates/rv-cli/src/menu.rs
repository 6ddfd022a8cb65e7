//! Interactive menu loop

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use rv_launcher::menu::{render_menu, MenuCommand};
use rv_launcher::{LifecycleController, MenuOutcome};

use crate::output::{format_sessions, format_tunnels};

/// Read commands from `input` until quit or end of input.
///
/// Command failures are logged and the operator is prompted again.
pub async fn run_menu<R>(controller: &LifecycleController, input: R, version: &str)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        print!("{}> ", render_menu(version));
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("End of input");
                break;
            }
            Err(e) => {
                tracing::error!("Failed to read command: {}", e);
                break;
            }
        };

        let command = match line.parse::<MenuCommand>() {
            Ok(command) => command,
            Err(e) => {
                tracing::error!("{}", e);
                continue;
            }
        };

        match controller.dispatch(command).await {
            Ok(MenuOutcome::Quit) => break,
            Ok(MenuOutcome::Sessions(sessions)) => println!("{}", format_sessions(&sessions)),
            Ok(MenuOutcome::Tunnels(tunnels)) => println!("{}", format_tunnels(&tunnels)),
            Ok(MenuOutcome::Idle) => {}
            Err(e) => tracing::error!("{}", e),
        }
    }
}
