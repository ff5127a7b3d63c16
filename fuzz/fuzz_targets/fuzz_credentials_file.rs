#![no_main]

use kasir_auth::{AuthConfig, HashedDirectory, Pin};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Parsing must fail cleanly, never panic
    let _ = HashedDirectory::from_toml_str(text);
    if let Ok(config) = AuthConfig::from_toml_str(text) {
        assert!(config.validate().is_ok());
    }
    if let Ok(pin) = Pin::parse(text) {
        assert_eq!(pin.as_str(), text);
    }
});
