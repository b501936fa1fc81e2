/// 抓取三個來源的 OpenAPI 並輸出 JSON
pub mod harvest;
