use gate_server::{ServerState, print_banner, setup_environment};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 设置环境 (dotenv, 日志) 并加载配置
    let config = setup_environment()?;

    print_banner();
    tracing::info!(work_dir = %config.work_dir, "Gate node starting...");

    // 2. 初始化状态
    let state = ServerState::initialize(&config)?;

    // 3. 启动后台任务 (事件路由、TCP 桥接、定时任务)
    let tasks = state.start_background_tasks(true);

    // 4. 等待退出信号
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    state.bus.shutdown();
    tasks.shutdown(config.shutdown_timeout()).await;

    tracing::info!("Gate node stopped");
    Ok(())
}
