use byteorder::{LittleEndian, ReadBytesExt};
use fcache::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader};
use tempfile::TempDir;

#[test]
fn ints_stay_in_bounds() {
    for _ in 0..100 {
        let val = random_int(10, 20);
        assert!(val >= 10 && val <= 20);
    }
}

#[test]
fn vec_has_requested_length_bounds_and_spread() {
    let vals = random_vec(0, 100, 50);
    assert_eq!(vals.len(), 50);
    assert!(vals.iter().all(|v| (0..=100).contains(v)));

    // crude randomness check: more than one distinct value
    let unique: HashSet<_> = vals.iter().collect();
    assert!(unique.len() > 1);
}

#[test]
fn file_holds_count_ints_in_bounds() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("rand.bin");
    random_file(&path, 1, 10, 100)?;

    let mut reader = BufReader::new(File::open(&path)?);
    let mut vals = Vec::new();
    loop {
        match reader.read_i32::<LittleEndian>() {
            Ok(v) => vals.push(v),
            Err(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        }
    }

    assert_eq!(vals.len(), 100);
    assert!(vals.iter().all(|v| (1..=10).contains(v)));
    let unique: HashSet<_> = vals.iter().collect();
    assert!(unique.len() > 1);
    Ok(())
}
