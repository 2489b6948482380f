//! Binary library format checks: exact on-disk layout and merge → read
//! round trips.

mod common;

use std::io::{Read, Seek, SeekFrom};

use common::LibBuilder;
use tempfile::TempDir;

use activara::data::{DataLibrary, Kza};

#[test]
fn test_header_points_at_trailer() {
    let tmp = TempDir::new().expect("tempdir");
    let path = LibBuilder::new(2)
        .trans("fe-56", &[("fe-57", "g", &[1.0, 2.0])])
        .stable("ni-60")
        .write(tmp.path());

    let mut file = std::fs::File::open(&path).expect("open raw");
    let mut buf8 = [0u8; 8];
    file.read_exact(&mut buf8).expect("trailer offset");
    let trailer_offset = u64::from_le_bytes(buf8);

    let mut buf4 = [0u8; 4];
    file.read_exact(&mut buf4).expect("parent count");
    assert_eq!(i32::from_le_bytes(buf4), 2);
    file.read_exact(&mut buf4).expect("group count");
    assert_eq!(i32::from_le_bytes(buf4), 2);

    // block pointer sentinels -1 and 0
    file.read_exact(&mut buf4).expect("bounds sentinel");
    assert_eq!(i32::from_le_bytes(buf4), -1);
    file.read_exact(&mut buf8).expect("bounds offset");
    file.read_exact(&mut buf4).expect("weights sentinel");
    assert_eq!(i32::from_le_bytes(buf4), 0);
    file.read_exact(&mut buf8).expect("weights offset");

    // the trailer leads with the library type byte, then repeats N and G
    file.seek(SeekFrom::Start(trailer_offset)).expect("seek");
    let mut type_byte = [0u8; 1];
    file.read_exact(&mut type_byte).expect("lib type");
    assert_eq!(type_byte[0], b'1');
    file.read_exact(&mut buf4).expect("trailer N");
    assert_eq!(i32::from_le_bytes(buf4), 2);
    file.read_exact(&mut buf4).expect("trailer G");
    assert_eq!(i32::from_le_bytes(buf4), 2);
}

#[test]
fn test_merged_channel_content() {
    // a parent in both sources: the shared daughter merges cross-section
    // and decay rate into one channel
    let tmp = TempDir::new().expect("tempdir");
    let half_life = 1000.0f32;
    let path = LibBuilder::new(1)
        .trans("co-60", &[("ni-60", "g", &[4.0])])
        .decay("co-60", half_life, &[("ni-60", 1.0)])
        .stable("ni-60")
        .write(tmp.path());

    let mut lib = DataLibrary::open(&path).expect("open");
    let co = lib
        .read(Kza::parse("co-60").expect("kza"))
        .expect("read")
        .expect("present");

    assert_eq!(co.paths.len(), 1);
    let path0 = &co.paths[0];
    assert_eq!(path0.daughter, Kza::parse("ni-60").expect("kza"));
    assert_eq!(path0.emitted, "g,*D");
    // cross-section scaled to cm^2, decay rate in the extra slot
    assert!((path0.xs[0] - 4.0e-24).abs() < 1e-36);
    let lambda = f64::from(std::f32::consts::LN_2 / half_life);
    assert!((path0.xs[1] - lambda).abs() / lambda < 1e-6);
    // the aggregate destruction vector sums the non-inclusive channels
    assert!((co.destruction[0] - 4.0e-24).abs() < 1e-36);
    assert!((co.destruction[1] - co.lambda).abs() < 1e-12);
}

#[test]
fn test_inclusive_channel_not_in_destruction() {
    let tmp = TempDir::new().expect("tempdir");
    let path = LibBuilder::new(1)
        .trans(
            "fe-56",
            &[("fe-57", "g", &[2.0]), ("mn-56", "x", &[100.0])],
        )
        .write(tmp.path());

    let mut lib = DataLibrary::open(&path).expect("open");
    let fe = lib
        .read(Kza::parse("fe-56").expect("kza"))
        .expect("read")
        .expect("present");
    assert_eq!(fe.paths.len(), 2);
    // "x" channels survive as paths but stay out of the total
    assert!((fe.destruction[0] - 2.0e-24).abs() < 1e-36);
}

#[test]
fn test_sorted_iteration_and_isomers() {
    let tmp = TempDir::new().expect("tempdir");
    let path = LibBuilder::new(1)
        .stable("ag-110m")
        .stable("ag-110")
        .stable("fe-56")
        .stable("co-60")
        .write(tmp.path());

    let mut lib = DataLibrary::open(&path).expect("open");
    let kzas = lib.kzas();
    let mut sorted = kzas.clone();
    sorted.sort_by_key(|k| k.base_za());
    assert_eq!(kzas, sorted);

    // isomer resolution goes through the base-ZA neighbourhood scan
    let ground = lib
        .read(Kza::parse("ag-110").expect("kza"))
        .expect("read")
        .expect("ground state");
    assert_eq!(ground.kza.isomer(), 0);
    let meta = lib
        .read(Kza::parse("ag-110m").expect("kza"))
        .expect("read")
        .expect("isomer");
    assert_eq!(meta.kza.isomer(), 1);
}

#[test]
fn test_decay_paths_sorted_first() {
    let tmp = TempDir::new().expect("tempdir");
    let path = LibBuilder::new(1)
        .trans("co-60", &[("co-61", "g", &[1.0])])
        .decay("co-60", 1000.0, &[("ni-60", 1.0)])
        .write(tmp.path());

    let mut lib = DataLibrary::open(&path).expect("open");
    let co = lib
        .read(Kza::parse("co-60").expect("kza"))
        .expect("read")
        .expect("present");
    assert_eq!(co.paths.len(), 2);
    assert_eq!(co.n_decay, 1);
    // decay channel first regardless of merge emit order
    assert!(co.paths[0].is_decay(1));
    assert_eq!(co.paths[0].daughter, Kza::parse("ni-60").expect("kza"));
    assert!(!co.paths[1].is_decay(1));
}
