#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_core::Hash;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(hash) = Hash::decode(text) {
            assert_eq!(Hash::decode(&hash.to_string()), Ok(hash));
        }
    }
    if let Ok(hash) = Hash::from_multihash(data) {
        assert_eq!(hash.to_multihash().as_slice(), data);
    }
});
