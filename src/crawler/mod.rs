/// 對每個端點發出請求
pub mod executor;
/// swagger / OpenAPI 文件的端點探索
pub mod openapi;
