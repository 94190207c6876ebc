//! Calculator plugin: serves the calculator package on stdio.

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    agent_plugin::run_plugin(agent_plugin::calculator::package()).await
}
