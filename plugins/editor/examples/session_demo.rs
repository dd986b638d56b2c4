//! Walk through an editing session: select, run, fix, run again, export
//!
//! The project is stored in a temporary JSON file and exported next to it.

use atelier_core::{
    event::{EventBus, InMemoryEventBus, SystemEvent, SystemEventHandler},
    EditorConfig, JsonFileStore, Result,
};
use atelier_editor::{EditorSession, RunOutcome};
use atelier_preview::PreviewStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

struct PrintingHandler;

#[async_trait]
impl SystemEventHandler for PrintingHandler {
    async fn handle_system_event(&self, event: &SystemEvent) -> Result<()> {
        println!("  event: {}", event.description());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== Editor Session Demo ===\n");

    let temp_dir = tempdir()?;
    let store = Arc::new(JsonFileStore::new(temp_dir.path().join("storage.json")));

    let event_bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
    event_bus
        .subscribe_system_events(Arc::new(PrintingHandler))
        .await?;

    let previews = PreviewStore::new(Duration::from_secs(1), 4);
    let mut session =
        EditorSession::open(store, EditorConfig::default(), previews, Some(event_bus)).await?;

    let index = session
        .tree()
        .find_path("index.html")
        .map(|node| node.id())
        .ok_or("scaffold has no index.html")?;
    session.select(index)?;

    println!("Breaking the page and running it:");
    session
        .edit("<html>\n<body>\n  <div class=box>\n</body>\n</html>")
        .await?;
    if let RunOutcome::Blocked { diagnostics } = session.run().await? {
        for diagnostic in &diagnostics {
            println!("  {}", diagnostic);
        }
        let highlight = session.navigate_to(0)?;
        println!(
            "  jumped to line {}, column {}",
            highlight.position.line + 1,
            highlight.position.column + 1
        );
    }

    println!("\nFixing it and running again:");
    session
        .edit("<html>\n<body>\n  <div class=\"box\"></div>\n</body>\n</html>")
        .await?;
    if let Some(preview) = session.run().await?.preview() {
        println!("  preview at {}", preview.url);
    }

    let archive = session.export_to(temp_dir.path()).await?;
    session.flush().await?;
    println!("\n✓ Exported {}", archive.display());

    Ok(())
}
