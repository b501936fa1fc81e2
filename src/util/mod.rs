use once_cell::sync::OnceCell;

pub mod http;

static CRYPTO_PROVIDER: OnceCell<()> = OnceCell::new();

/// reqwest 使用 rustls-no-provider，需在建立 Client 前安裝 ring 作為加密實作
pub fn ensure_rustls_crypto_provider() {
    CRYPTO_PROVIDER.get_or_init(|| {
        // 已有其他程式碼先安裝時會回傳 Err，可忽略
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
