use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs;

use crate::infrastructure::HostFixture;

/// 从 TOML 文件加载模拟主机数据
///
/// # 参数
/// - `fixture_path`: 主机数据文件路径
///
/// # 返回
/// 返回解析后的 [`HostFixture`]
pub async fn load_host_fixture(fixture_path: &Path) -> Result<HostFixture> {
    let content = fs::read_to_string(fixture_path)
        .await
        .with_context(|| format!("无法读取模拟主机数据: {}", fixture_path.display()))?;

    let fixture: HostFixture = toml::from_str(&content)
        .with_context(|| format!("无法解析模拟主机数据: {}", fixture_path.display()))?;

    tracing::info!(
        "成功加载模拟主机数据: {} 个订单, {} 个凭证, {} 个通知",
        fixture.orders.len(),
        fixture.documents.len(),
        fixture.notifications.len()
    );

    Ok(fixture)
}
