//! `xt hosts`: show what a pattern resolves to.

use super::{load_context, GlobalArgs};

pub async fn list(globals: &GlobalArgs<'_>, pattern: &str) -> Result<(), String> {
    let ctx = load_context(globals)?;
    let targets = ctx.targets(pattern).await?;

    println!(
        "{} host(s) for {}~{} in profile '{}':",
        targets.len(),
        ctx.tag,
        pattern,
        ctx.profile.name
    );
    for host in &targets {
        println!("  {}", host);
    }
    Ok(())
}
