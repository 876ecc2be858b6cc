#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    // Vendor exports come from another program's disk writes; a truncated
    // or corrupted file must be an error, never a panic.
    let _ = secm::potentiostat::parse_ascii(Cursor::new(data));

    if let Ok(variables) = secm::potentiostat::parse_mat(data) {
        let _ = secm::potentiostat::traces_from_mat(&variables);
    }
});
