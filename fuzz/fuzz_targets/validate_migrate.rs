#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_core::Entry;
use tether_core::action::MigrateEntry;

// Arbitrary bytes as a marshaled entry, then as a migrate payload; field
// decoding must report errors, never panic.
fuzz_target!(|data: &[u8]| {
    let Ok(entry) = Entry::unmarshal(data) else {
        return;
    };
    if let Ok(payload) = MigrateEntry::from_entry(&entry) {
        let _ = payload.decode_dna_hash();
        let _ = payload.decode_key();
        let _ = serde_json::to_string(&payload);
    }
});
