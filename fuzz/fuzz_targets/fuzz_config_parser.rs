#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Malformed TOML must surface as an error, never a panic
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = inkstream::Config::parse_str(s) {
            let _ = config.validate();
        }
    }
});
