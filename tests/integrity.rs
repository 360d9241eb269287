use std::fs;

use swapmap::{Result, SwapError, SwapMap, SwapMapOptions};
use tempfile::{tempdir, TempDir};

fn options(dir: &TempDir, name: &str) -> SwapMapOptions {
    SwapMapOptions::new().dir(dir.path()).base_name(name)
}

#[test]
fn flipped_payload_byte_surfaces_corruption() -> Result<()> {
    let dir = tempdir()?;
    let map: SwapMap<String, String> = SwapMap::create(options(&dir, "flip"))?;
    map.set(&"k".to_owned(), &"v".to_owned())?;

    let data_path = dir.path().join("flip.swp");
    let mut bytes = fs::read(&data_path)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(&data_path, &bytes)?;

    assert!(matches!(
        map.get(&"k".to_owned()),
        Err(SwapError::Corruption(_))
    ));
    map.close()
}

#[test]
fn truncated_backing_file_surfaces_corruption() -> Result<()> {
    let dir = tempdir()?;
    let map: SwapMap<String, String> = SwapMap::create(options(&dir, "truncate"))?;
    map.set(&"k".to_owned(), &"v".to_owned())?;

    let data_path = dir.path().join("truncate.swp");
    let bytes = fs::read(&data_path)?;
    fs::write(&data_path, &bytes[..bytes.len() / 2])?;

    assert!(matches!(map.len(), Err(SwapError::Corruption(_))));
    map.close()
}

#[test]
fn overwritten_backing_file_surfaces_corruption() -> Result<()> {
    let dir = tempdir()?;
    let map: SwapMap<String, String> = SwapMap::create(options(&dir, "foreign"))?;

    let data_path = dir.path().join("foreign.swp");
    fs::write(&data_path, b"not a swap file at all")?;

    assert!(matches!(map.len(), Err(SwapError::Corruption(_))));
    map.close()
}
