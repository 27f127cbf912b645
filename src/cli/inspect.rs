use anyhow::Result;

use super::context::CliContext;

pub async fn cmd_inspect(ctx: &CliContext) -> Result<()> {
    let services = ctx.services_with_browser().await?;
    let inspection = services.orchestrator.inspect().await?;
    if ctx.output().emit(&inspection)? {
        return Ok(());
    }

    println!("Page: {}", inspection.url.as_deref().unwrap_or("unknown"));
    println!("Agent: {:?}", inspection.state);
    let diagnostic = &inspection.diagnostic;
    println!(
        "Dialogs: {}  Editables: {}  Buttons: {}",
        diagnostic.dialogs, diagnostic.editables, diagnostic.buttons
    );
    for (title, candidates) in [
        ("Compose candidates", &inspection.compose_candidates),
        ("Submit candidates", &inspection.submit_candidates),
    ] {
        println!("{title}:");
        if candidates.is_empty() {
            println!("  (none)");
        }
        for candidate in candidates {
            println!(
                "  {:>4}  {}  [{}]",
                candidate.score,
                candidate.label,
                candidate.role.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}
