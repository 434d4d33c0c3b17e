//! Helpers for building XVA-shaped tar archives in tests.

#![allow(dead_code)]

use std::fs::File;
use std::io;
use std::path::Path;

use xvatool_core::block::{block_file_name, BLOCK_SIZE};

/// One entry of a test archive.
pub enum Item<'a> {
    Dir(&'a str, u32),
    File(&'a str, Vec<u8>),
}

/// Write a tar archive at `path` containing `items` in order.
pub fn write_tar(path: &Path, items: &[Item<'_>]) {
    let file = File::create(path).expect("Failed to create archive");
    let mut builder = tar::Builder::new(file);

    for item in items {
        match item {
            Item::Dir(name, mode) => {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(*mode);
                builder
                    .append_data(&mut header, name, io::empty())
                    .expect("Failed to append directory");
            }
            Item::File(name, data) => {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                builder
                    .append_data(&mut header, name, data.as_slice())
                    .expect("Failed to append file");
            }
        }
    }

    builder.finish().expect("Failed to finish archive");
}

/// Deterministic full-size content for block `index` of a disk seeded `seed`.
pub fn block_data(seed: u8, index: u64) -> Vec<u8> {
    let start = seed.wrapping_mul(31).wrapping_add(index as u8);
    (0..BLOCK_SIZE as usize)
        .map(|j| start.wrapping_add((j % 251) as u8) | 1)
        .collect()
}

/// Archive items for one disk directory holding the given block indices.
pub fn disk_items(dir: &str, seed: u8, indices: &[u64]) -> Vec<(String, Vec<u8>)> {
    indices
        .iter()
        .map(|&i| (format!("{dir}/{}", block_file_name(i)), block_data(seed, i)))
        .collect()
}

/// Expected raw image for a disk with the given present indices.
pub fn expected_image(seed: u8, indices: &[u64]) -> Vec<u8> {
    let total = indices.iter().max().map(|m| m + 1).unwrap_or(0);
    let mut image = vec![0u8; (total * BLOCK_SIZE) as usize];
    for &i in indices {
        let start = (i * BLOCK_SIZE) as usize;
        image[start..start + BLOCK_SIZE as usize].copy_from_slice(&block_data(seed, i));
    }
    image
}

/// Write an XVA with an `ova.xml` and one `Ref:` directory per disk.
///
/// Each disk is `(directory name, seed, present block indices)`.
pub fn write_xva(path: &Path, disks: &[(&str, u8, Vec<u64>)]) {
    let mut owned: Vec<(String, Vec<u8>)> = vec![("ova.xml".to_string(), b"<value/>".to_vec())];
    let mut dirs = Vec::new();
    for (dir, seed, indices) in disks {
        dirs.push(dir.to_string());
        owned.extend(disk_items(dir, *seed, indices));
        if let Some(&first) = indices.first() {
            owned.push((
                format!("{dir}/{}.checksum", block_file_name(first)),
                b"da39a3ee5e6b4b0d3255bfef95601890afd80709".to_vec(),
            ));
        }
    }

    let mut items: Vec<Item<'_>> = dirs.iter().map(|d| Item::Dir(d.as_str(), 0o755)).collect();
    items.extend(owned.iter().map(|(name, data)| Item::File(name.as_str(), data.clone())));
    write_tar(path, &items);
}
