//! Clock plugin: serves the clock package on stdio.

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    agent_plugin::run_plugin(agent_plugin::clock::package()).await
}
