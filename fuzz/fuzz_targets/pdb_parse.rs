#![no_main]

use libfuzzer_sys::fuzz_target;
use netdbg_symbols::{MethodToken, PortablePdb};

const MAX_PDB_BYTES: usize = 1 << 20;

fuzz_target!(|data: &[u8]| {
    let capped = &data[..data.len().min(MAX_PDB_BYTES)];

    // Malformed metadata must produce errors, never panics or hangs.
    let Ok(pdb) = PortablePdb::parse(capped) else {
        return;
    };

    for document in pdb.documents() {
        let _ = document.normalized.len();
    }
    for method in pdb.methods() {
        let _ = pdb.sequence_points(method.token);
    }
    // Out-of-range and non-method tokens are rejected, not panics.
    let _ = pdb.sequence_points(MethodToken::from_row(u32::MAX >> 8));
    let _ = pdb.sequence_points(MethodToken(0x0200_0001));
});
