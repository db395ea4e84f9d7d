// ==========================================
// 铁路区段调度系统 - 主入口
// ==========================================
// 用法: section-dispatch <network.json> <timetable.csv> [--resume]
// 环境变量: SECTION_DISPATCH_DB_PATH / RUST_LOG / SECTION_DISPATCH_LOG_FORMAT
// ==========================================

use std::path::PathBuf;

use futures::StreamExt;
use section_dispatch::app::{get_default_db_path, AppState};
use section_dispatch::logging;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "section-dispatch", about = "铁路区段冲突检测与疏解建议")]
struct Opt {
    /// 线路拓扑 JSON
    #[structopt(name = "NETWORK")]
    #[structopt(parse(from_os_str))]
    network: PathBuf,

    /// 时刻表 CSV
    #[structopt(name = "TIMETABLE")]
    #[structopt(parse(from_os_str))]
    timetable: PathBuf,

    /// 从最近一次快照恢复
    #[structopt(long)]
    resume: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    // 初始化日志系统
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", section_dispatch::APP_NAME);
    tracing::info!("系统版本: {}", section_dispatch::VERSION);
    tracing::info!("==================================================");

    // 获取数据库路径
    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    // 拓扑无效时直接退出
    let state = AppState::from_files(
        db_path,
        &opt.network,
        &opt.timetable,
        None,
    )
    .await?;

    if opt.resume {
        match state.dispatch_api.restore_snapshot()? {
            Some(info) => tracing::info!(
                "已从快照恢复: snapshot_id={}, tick={}, clock={}",
                info.snapshot_id,
                info.tick,
                info.clock
            ),
            None => tracing::info!("无可用快照，从运行图起点开始"),
        }
    }

    // 事件流写入日志
    let mut events = Box::pin(state.dispatch_api.subscribe());
    let event_logger = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match serde_json::to_string(&event) {
                Ok(json) => tracing::info!(event_type = event.as_str(), tick = event.tick(), "{}", json),
                Err(e) => tracing::warn!("事件序列化失败: {}", e),
            }
        }
    });

    let scheduler = state.scheduler.clone();
    scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("停止信号监听失败: {}", e);
            }
        })
        .await;

    // 退出前落一份快照
    match state.dispatch_api.save_snapshot() {
        Ok(info) => tracing::info!("退出快照已保存: snapshot_id={}", info.snapshot_id),
        Err(e) => tracing::error!("退出快照保存失败: {}", e),
    }
    event_logger.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_paths_and_resume_flag() {
        let opt = Opt::from_iter(&["section-dispatch", "net.json", "tt.csv", "--resume"]);
        assert_eq!(opt.network, PathBuf::from("net.json"));
        assert_eq!(opt.timetable, PathBuf::from("tt.csv"));
        assert!(opt.resume);

        let opt = Opt::from_iter(&["section-dispatch", "net.json", "tt.csv"]);
        assert!(!opt.resume);
    }

    #[test]
    fn test_requires_both_paths() {
        assert!(Opt::from_iter_safe(&["section-dispatch", "net.json"]).is_err());
    }
}
