//! Interactive console.

use anyhow::Result;
use lamport_cluster::Node;
use lamport_core::{CoreError, PeerAddress};
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Help text
pub const HELP: &str = "\
Commands:
j <host> <port>       - Join network via node
leave                 - Leave network
l                     - List known nodes
req                   - Request critical section
rel                   - Release critical section
gv                    - Get shared variable
sv <value>            - Set shared variable
s                     - Show node status
c                     - Show logical clock
d <ms>                - Set message delay
k                     - Simulate node crash
rev                   - Revive crashed node
det                   - Detect dead nodes
?                     - Show this help
q                     - Quit";

/// One console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `j <host> <port>`
    Join(PeerAddress),
    /// `leave`
    Leave,
    /// `l`
    List,
    /// `s`
    Status,
    /// `c`
    Clock,
    /// `req`
    Request,
    /// `rel`
    Release,
    /// `gv`
    GetVar,
    /// `sv <value>`
    SetVar(i64),
    /// `d <ms>`
    Delay(u64),
    /// `k`
    Kill,
    /// `rev`
    Revive,
    /// `det`
    Detect,
    /// `?`
    Help,
    /// `q`
    Quit,
}

impl FromStr for Command {
    type Err = CoreError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let usage = |message: &str| CoreError::ParseError {
            message: message.to_string(),
        };
        let Some(head) = parts.first() else {
            return Err(usage("empty command"));
        };

        let command = match head.to_ascii_lowercase().as_str() {
            "j" => {
                let [_, host, port] = parts.as_slice() else {
                    return Err(usage("usage: j <host> <port>"));
                };
                let port = port
                    .parse()
                    .map_err(|_| usage(&format!("bad port '{}'", port)))?;
                Self::Join(PeerAddress::new(*host, port))
            }
            "leave" => Self::Leave,
            "l" => Self::List,
            "s" => Self::Status,
            "c" => Self::Clock,
            "req" => Self::Request,
            "rel" => Self::Release,
            "gv" => Self::GetVar,
            "sv" => {
                let value = parts.get(1).ok_or_else(|| usage("usage: sv <value>"))?;
                Self::SetVar(
                    value
                        .parse()
                        .map_err(|_| usage(&format!("bad value '{}'", value)))?,
                )
            }
            "d" => {
                let ms = parts.get(1).ok_or_else(|| usage("usage: d <ms>"))?;
                Self::Delay(ms.parse().map_err(|_| usage(&format!("bad delay '{}'", ms)))?)
            }
            "k" => Self::Kill,
            "rev" => Self::Revive,
            "det" => Self::Detect,
            "?" | "help" => Self::Help,
            "q" | "quit" => Self::Quit,
            other => return Err(usage(&format!("unrecognized command '{}', type ? for help", other))),
        };
        Ok(command)
    }
}

/// Run `command` against `node` and render the output
pub async fn execute(node: &Node, command: Command) -> String {
    let outcome = match command {
        Command::Join(address) => node
            .join_network(&address)
            .await
            .map(|members| format!("Joined via {}, {} known nodes", address, members)),
        Command::Leave => node.leave().await.map(|()| "Left the network".to_string()),
        Command::List => {
            let mut out = String::new();
            for record in node.known_nodes().await {
                let _ = writeln!(out, "Node ID: {} ({})", record.peer_id, record.address);
            }
            Ok(out.trim_end().to_string())
        }
        Command::Status => {
            let status = node.status().await;
            let queue: Vec<String> = status.queue.iter().map(ToString::to_string).collect();
            Ok(format!(
                "Node ID: {}\nAlive: {}\nLogical Clock: {}\nPhase: {}\nRequest Queue: [{}]\nMessage Delay: {}ms\nKnown Nodes: {}",
                status.peer_id,
                status.alive,
                status.clock,
                status.phase,
                queue.join(", "),
                status.message_delay_ms,
                status.members.len()
            ))
        }
        Command::Clock => Ok(format!("Logical Clock: {}", node.logical_clock())),
        Command::Request => node
            .enter_cs()
            .await
            .map(|()| "Entered critical section".to_string()),
        Command::Release => node
            .leave_cs()
            .await
            .map(|()| "Left critical section".to_string()),
        Command::GetVar => Ok(format!("Shared variable: {}", node.get_shared_variable().await)),
        Command::SetVar(value) => node
            .set_shared_variable(value)
            .await
            .map(|()| format!("Shared variable set to {}", value)),
        Command::Delay(ms) => {
            node.set_message_delay_ms(ms);
            Ok(format!("Message delay set to {}ms", ms))
        }
        Command::Kill => {
            node.kill();
            Ok("Node killed".to_string())
        }
        Command::Revive => Ok(if node.revive().await {
            "Node revived and rejoined".to_string()
        } else {
            "Node revived, no peer reachable".to_string()
        }),
        Command::Detect => node.detect_dead_nodes().await.map(|dead| {
            if dead.is_empty() {
                "No dead nodes".to_string()
            } else {
                let ids: Vec<String> = dead.iter().map(ToString::to_string).collect();
                format!("Evicted: {}", ids.join(", "))
            }
        }),
        Command::Help => Ok(HELP.to_string()),
        Command::Quit => Ok(String::new()),
    };
    outcome.unwrap_or_else(|e| format!("Error: {}", e))
}

/// Read commands from stdin until `q` or end of input
///
/// # Errors
///
/// Fails on stdin or stdout errors.
pub async fn run(node: Arc<Node>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout.write_all(format!("{}\n", HELP).as_bytes()).await?;
    loop {
        stdout
            .write_all(format!("[Node {}]> ", node.id()).as_bytes())
            .await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let output = match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(command) => execute(&node, command).await,
            Err(e) => format!("Error: {}", e),
        };
        if !output.is_empty() {
            stdout.write_all(format!("{}\n", output).as_bytes()).await?;
        }
    }
    Ok(())
}
