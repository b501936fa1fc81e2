use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// 提供 OpenAPI 的資料來源
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Source {
    /// 臺灣證券交易所
    TWSE,
    /// 證券櫃檯買賣中心
    TPEx,
    /// 臺灣期貨交易所
    TAIFEX,
}

impl Source {
    /// 預設的 swagger 文件位址
    pub fn swagger_url(&self) -> &'static str {
        match self {
            Source::TWSE => "https://openapi.twse.com.tw/v1/swagger.json",
            Source::TPEx => "https://www.tpex.org.tw/openapi/swagger.json",
            Source::TAIFEX => "https://openapi.taifex.com.tw/swagger.json",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Source::TWSE => "臺灣證券交易所",
            Source::TPEx => "證券櫃檯買賣中心",
            Source::TAIFEX => "臺灣期貨交易所",
        }
    }

    /// 輸出目錄名稱，例如 swagger/twse
    pub fn dir_name(&self) -> &str {
        self.as_ref()
    }

    pub fn iterator() -> impl Iterator<Item = Self> {
        Self::iter()
    }
}

/// 單一端點的抓取結果
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Failure,
}
