// 该文件是 Xianshi （鲜食） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use xianshi::bundle;
use xianshi::config::Config;
use xianshi::server;

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let config = Config::parse();

  info!("Xianshi 食物新鲜度检测服务");
  info!("==================");
  info!("检测器权重: {}", config.detector_weights);
  info!("分类器权重: {}", config.freshness_weights);
  info!("计算设备: {}", config.device);

  // 模型加载是重型阻塞操作，放到阻塞线程池执行
  let load_config = config.clone();
  let bundle = tokio::task::spawn_blocking(move || bundle::load(&load_config)).await??;
  info!(
    "模型就绪，新鲜度策略: {}",
    if bundle.estimator.is_network() {
      "训练分类器"
    } else {
      "颜色启发式"
    }
  );

  let app = server::app(bundle, &config.origins());
  let addr = format!("{}:{}", config.host, config.port);
  let listener = tokio::net::TcpListener::bind(&addr).await?;
  info!("服务监听于 http://{}", addr);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  info!("服务退出");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(err) = tokio::signal::ctrl_c().await {
    error!("无法监听中断信号: {}", err);
    return;
  }
  info!("收到中断信号，准备退出...");
}
