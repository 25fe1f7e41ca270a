// Console front end - stdin lines in, pipeline events out

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::courier::{Courier, CourierError, EventKind, PipelineEvent};

const SESSION: &str = "console";

/// One line per event
pub fn render(event: &PipelineEvent) -> String {
    let id = event.request_id;
    match &event.kind {
        EventKind::Started { url } => format!("[#{}] Processing {}", id, url),
        EventKind::SelectionPrompt { text } => format!("[#{}] {}", id, text),
        EventKind::Status { text } => format!("[#{}] {}", id, text),
        EventKind::Completed { summary } => format!("[#{}] ✓ {}", id, summary),
        EventKind::Failed { reason } => format!("[#{}] ✗ {}", id, reason),
        EventKind::TimedOut => format!("[#{}] ✗ No selection received, request dropped", id),
    }
}

/// Read messages until EOF, then wait for in-flight requests
pub async fn run(courier: Arc<Courier>, mut events: UnboundedReceiver<PipelineEvent>) -> Result<(), CourierError> {
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", render(&event));
        }
    });

    println!("Paste a page URL (Ctrl-D to quit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut running: Vec<JoinHandle<()>> = Vec::new();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match courier.handle_message(SESSION, line) {
            Some(handle) => running.push(handle),
            None => debug!("[Console] No new request from {:?}", line),
        }
        running.retain(|h| !h.is_finished());
    }

    for handle in running {
        if let Err(e) = handle.await {
            warn!("[Console] Request task failed: {}", e);
        }
    }
    drop(courier);
    let _ = printer.await;
    Ok(())
}
