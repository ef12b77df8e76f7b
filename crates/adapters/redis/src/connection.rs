//! Redis 连接管理

use redis::Client;
use redis::aio::ConnectionManager;
use twinguard_errors::{AppError, AppResult};

pub fn open_client(url: &str) -> AppResult<Client> {
    Client::open(url)
        .map_err(|e| AppError::external_service(format!("Failed to create Redis client: {}", e)))
}

/// 创建 Redis 连接管理器
pub async fn create_connection_manager(client: Client) -> AppResult<ConnectionManager> {
    ConnectionManager::new(client).await.map_err(|e| {
        AppError::external_service(format!("Failed to create Redis connection manager: {}", e))
    })
}

/// 检查 Redis 连接
pub async fn check_connection(conn: &mut ConnectionManager) -> AppResult<()> {
    redis::cmd("PING")
        .query_async::<String>(conn)
        .await
        .map_err(|e| AppError::external_service(format!("Redis health check failed: {}", e)))?;
    Ok(())
}
