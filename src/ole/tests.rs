//! End-to-end scenarios across the container layers.

use super::consts::*;
use super::*;
use crate::common::binary::{patch_u32_le, read_u16_le, read_u32_le};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ seed).collect()
}

fn reopen(cfb: &mut CompoundFile) -> CompoundFile {
    let bytes = cfb.commit().unwrap();
    let reopened = CompoundFile::from_bytes(&bytes).unwrap();
    reopened.check_integrity().unwrap();
    reopened
}

#[test]
fn test_empty_container() {
    init();
    let mut cfb = CompoundFile::create();
    let bytes = cfb.commit().unwrap();

    assert_eq!(&bytes[..8], MAGIC);
    assert_eq!(read_u16_le(&bytes, 30).unwrap(), 9);
    assert_eq!(read_u16_le(&bytes, 32).unwrap(), MINI_SECTOR_SHIFT);
    assert_eq!(read_u32_le(&bytes, 60).unwrap(), ENDOFCHAIN);

    let reopened = CompoundFile::from_bytes(&bytes).unwrap();
    assert!(reopened.children(reopened.root_id()).unwrap().is_empty());
    assert_eq!(reopened.entry(reopened.root_id()).unwrap().name(), ROOT_ENTRY_NAME);
    assert!(reopened.minifat().is_empty());
    assert!(!reopened.is_dirty());
}

#[test]
fn test_mini_to_big_boundary() {
    init();
    let mut cfb = CompoundFile::create();
    let expected = pattern(4097, 0x5A);
    let id = cfb.put_stream(&["Boundary"], &expected[..4095]).unwrap();
    assert_eq!(cfb.storage_mode(id).unwrap(), StorageMode::Mini);

    cfb.write_at(id, 4095, &expected[4095..]).unwrap();
    assert_eq!(cfb.storage_mode(id).unwrap(), StorageMode::Big);
    assert_eq!(cfb.read_stream(id).unwrap(), expected);
    // The mini sectors went back to the MiniFAT
    assert!(cfb.minifat().entries().iter().all(|&e| e == FREESECT));

    let reopened = reopen(&mut cfb);
    assert_eq!(reopened.open_stream(&["Boundary"]).unwrap(), expected);
}

#[test]
fn test_incremental_growth_migrates() {
    init();
    let mut cfb = CompoundFile::create();
    let id = cfb.put_stream(&["Growing"], &pattern(100, 1)).unwrap();
    let expected = pattern(5000, 1);

    let mut written = 100;
    while written < expected.len() {
        let end = (written + 300).min(expected.len());
        cfb.write_at(id, written as u64, &expected[written..end]).unwrap();
        written = end;
    }

    assert_eq!(cfb.storage_mode(id).unwrap(), StorageMode::Big);
    assert_eq!(cfb.read_at(id, 0, 5000).unwrap(), expected);
    assert_eq!(cfb.stream_chain(id).unwrap().len(), 5000usize.div_ceil(512));
    cfb.check_integrity().unwrap();
}

#[test]
fn test_downward_migration() {
    init();
    let mut cfb = CompoundFile::create();
    let content = pattern(10_000, 7);
    let id = cfb.put_stream(&["Shrinking"], &content).unwrap();
    assert_eq!(cfb.storage_mode(id).unwrap(), StorageMode::Big);

    cfb.truncate(id, 100).unwrap();
    assert_eq!(cfb.storage_mode(id).unwrap(), StorageMode::Mini);
    assert_eq!(cfb.read_stream(id).unwrap(), &content[..100]);
    assert_eq!(cfb.stream_chain(id).unwrap().len(), 2);

    let reopened = reopen(&mut cfb);
    assert_eq!(reopened.open_stream(&["Shrinking"]).unwrap(), &content[..100]);
}

#[test]
fn test_write_past_end_zero_fills() {
    let mut cfb = CompoundFile::create();
    let id = cfb.put_stream(&["Sparse"], b"ab").unwrap();
    cfb.write_at(id, 10, b"xyz").unwrap();

    let mut expected = b"ab".to_vec();
    expected.resize(10, 0);
    expected.extend_from_slice(b"xyz");
    assert_eq!(cfb.read_stream(id).unwrap(), expected);

    cfb.set_stream_len(id, 5000).unwrap();
    let grown = cfb.read_stream(id).unwrap();
    assert_eq!(&grown[..13], &expected[..]);
    assert!(grown[13..].iter().all(|&b| b == 0));
}

#[test]
fn test_read_past_end_is_out_of_range() {
    let mut cfb = CompoundFile::create();
    let id = cfb.put_stream(&["Short"], b"0123456789").unwrap();
    assert_eq!(cfb.read_at(id, 8, 2).unwrap(), b"89");
    assert!(matches!(
        cfb.read_at(id, 8, 3),
        Err(CfbError::OutOfRange { size: 10, .. })
    ));
    assert!(matches!(
        cfb.truncate(id, 11),
        Err(CfbError::OutOfRange { .. })
    ));
}

#[test]
fn test_name_ordering_survives_commit() {
    init();
    for order in [["AAA", "BB", "A"], ["A", "AAA", "BB"], ["BB", "A", "AAA"]] {
        let mut cfb = CompoundFile::create();
        let root = cfb.root_id();
        for name in order {
            cfb.create_stream(root, name, name.as_bytes()).unwrap();
        }

        let reopened = reopen(&mut cfb);
        let names: Vec<&str> = reopened
            .list_entries(&[])
            .unwrap()
            .iter()
            .map(|e| e.name())
            .collect();
        assert_eq!(names, vec!["A", "BB", "AAA"]);
    }
}

#[test]
fn test_free_space_reuse() {
    let mut cfb = CompoundFile::create();
    let first = cfb.put_stream(&["First"], &[1u8; 6000]).unwrap();
    let freed = cfb.stream_chain(first).unwrap();
    let count = cfb.sector_count();

    cfb.delete(first, false).unwrap();
    let second = cfb.put_stream(&["Second"], &[2u8; 6000]).unwrap();
    assert_eq!(cfb.stream_chain(second).unwrap(), freed);
    assert_eq!(cfb.sector_count(), count);
}

#[test]
fn test_cycle_in_stored_fat() {
    init();
    let mut cfb = CompoundFile::create();
    let id = cfb.put_stream(&["Looped"], &[3u8; 5000]).unwrap();
    let chain = cfb.stream_chain(id).unwrap();
    assert_eq!(chain.len(), 10);
    let mut bytes = cfb.commit().unwrap();

    // Point the last sector of the stream back at its second sector
    let fat_sector = Header::parse(&bytes).unwrap().difat[0] as usize;
    let at = (fat_sector + 1) * 512 + chain[9] as usize * 4;
    patch_u32_le(&mut bytes, at, chain[1]);

    let cfb = CompoundFile::from_bytes(&bytes).unwrap();
    assert!(matches!(
        cfb.open_stream(&["Looped"]),
        Err(CfbError::CorruptChain {
            table: TableKind::Fat,
            ..
        })
    ));

    let options = CompoundFileOptions::new().with_verify_on_open(true);
    assert!(matches!(
        CompoundFile::from_bytes_with_options(&bytes, options),
        Err(CfbError::CorruptChain { .. })
    ));
}

#[test]
fn test_version4_container() {
    init();
    let options = CompoundFileOptions::new().with_version(Version::V4);
    let mut cfb = CompoundFile::create_with_options(options);
    assert_eq!(cfb.sector_size(), 4096);
    cfb.put_stream(&["Big"], &pattern(20_000, 9)).unwrap();
    cfb.put_stream(&["Storage", "Small"], b"small").unwrap();

    let bytes = cfb.commit().unwrap();
    assert_eq!(bytes.len() % 4096, 0);
    assert_eq!(read_u16_le(&bytes, 26).unwrap(), 4);
    assert_eq!(read_u16_le(&bytes, 30).unwrap(), 12);
    // Nothing but zeros between the 512-byte header and the first sector
    assert!(bytes[HEADER_SIZE..4096].iter().all(|&b| b == 0));

    let reopened = CompoundFile::from_bytes(&bytes).unwrap();
    reopened.check_integrity().unwrap();
    assert_eq!(reopened.version(), Version::V4);
    assert_eq!(reopened.open_stream(&["Big"]).unwrap(), pattern(20_000, 9));
    assert_eq!(reopened.open_stream(&["Storage", "Small"]).unwrap(), b"small");
}

#[test]
fn test_stream_needing_difat_sectors() {
    init();
    // 15,000 sectors need more FAT sectors than the header can list
    let content = pattern(15_000 * 512, 3);
    let mut cfb = CompoundFile::create();
    cfb.put_stream(&["Huge"], &content).unwrap();
    let bytes = cfb.commit().unwrap();

    let header = Header::parse(&bytes).unwrap();
    assert!(header.num_fat_sectors as usize > HEADER_DIFAT_ENTRIES);
    assert_eq!(header.num_difat_sectors, 1);
    assert_ne!(header.first_difat_sector, ENDOFCHAIN);

    let reopened = CompoundFile::from_bytes(&bytes).unwrap();
    reopened.check_integrity().unwrap();
    assert!(reopened.open_stream(&["Huge"]).unwrap() == content);
}

#[test]
fn test_save_and_open_path() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.bin");

    let mut cfb = CompoundFile::create();
    cfb.put_stream(&["Contents"], b"persisted").unwrap();
    cfb.save(&path).unwrap();
    assert!(!cfb.is_dirty());

    let opened = CompoundFile::open_path(&path).unwrap();
    assert_eq!(opened.open_stream(&["Contents"]).unwrap(), b"persisted");

    let file = std::fs::File::open(&path).unwrap();
    let opened = CompoundFile::open(file).unwrap();
    assert_eq!(opened.list_streams(), vec![vec!["Contents".to_string()]]);
}

#[test]
fn test_truncated_image() {
    let mut cfb = CompoundFile::create();
    cfb.put_stream(&["Data"], &[5u8; 10_000]).unwrap();
    let bytes = cfb.commit().unwrap();

    assert!(matches!(
        CompoundFile::from_bytes(&bytes[..2048]),
        Err(CfbError::TruncatedInput { .. })
    ));
    assert!(CompoundFile::from_bytes(&bytes[..100]).is_err());
}

#[test]
fn test_zip_is_reported_as_wrong_container() {
    let mut zip = b"PK\x03\x04\x14\x00\x00\x00".to_vec();
    zip.resize(1024, 0);
    match CompoundFile::from_bytes(&zip) {
        Err(CfbError::WrongContainerFormat { detected }) => {
            assert_eq!(detected, crate::common::ContainerKind::Zip);
        },
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_round_trip_tree_and_attributes() {
    init();
    let mut cfb = CompoundFile::create();
    let root = cfb.root_id();
    let pool = cfb.create_storage(root, "ObjectPool").unwrap();
    let object = cfb.create_storage(pool, "_1234").unwrap();
    cfb.create_stream(object, "\u{1}Ole", &pattern(20, 4)).unwrap();
    cfb.create_stream(object, "CONTENTS", &pattern(9000, 5)).unwrap();
    cfb.create_stream(root, "Empty", b"").unwrap();
    cfb.set_clsid(object, [0xAB; 16]).unwrap();
    cfb.set_state_bits(object, 0x10).unwrap();

    let reopened = reopen(&mut cfb);
    assert_eq!(reopened.list_streams(), cfb.list_streams());
    for path in cfb.list_streams() {
        let path: Vec<&str> = path.iter().map(String::as_str).collect();
        assert_eq!(
            reopened.open_stream(&path).unwrap(),
            cfb.open_stream(&path).unwrap()
        );
    }
    let object = reopened.find(&["ObjectPool", "_1234"]).unwrap();
    assert_eq!(reopened.entry(object).unwrap().clsid(), &[0xAB; 16]);
    assert_eq!(reopened.entry(object).unwrap().state_bits(), 0x10);
    assert_eq!(reopened.stream_len(reopened.find(&["Empty"]).unwrap()).unwrap(), 0);
}

#[test]
fn test_modify_reopened_container() {
    init();
    let mut cfb = CompoundFile::create();
    cfb.put_stream(&["Keep"], &pattern(3000, 1)).unwrap();
    cfb.put_stream(&["Replace"], &pattern(8000, 2)).unwrap();
    let mut reopened = reopen(&mut cfb);

    reopened.put_stream(&["Replace"], b"short now").unwrap();
    reopened
        .move_entry(
            reopened.find(&["Keep"]).unwrap(),
            reopened.root_id(),
            "Kept",
        )
        .unwrap();
    let again = reopen(&mut reopened);
    assert_eq!(again.open_stream(&["Kept"]).unwrap(), pattern(3000, 1));
    assert_eq!(again.open_stream(&["Replace"]).unwrap(), b"short now");
    assert!(!again.exists(&["Keep"]));
}

#[test]
fn test_hpsf_stream_round_trip() {
    init();
    let mut set = PropertySet::new(FMTID_SUMMARY_INFORMATION);
    set.sections[0].set(PID_CODEPAGE, Variant::I2(1252));
    set.sections[0].set(2, Variant::Lpstr("Title".into()));
    set.sections[0].set(
        0x1000,
        Variant::Unknown {
            type_tag: 0x0049,
            bytes: vec![1, 2, 3, 4],
        },
    );

    let mut cfb = CompoundFile::create();
    cfb.write_property_set(&[SUMMARY_INFORMATION_STREAM], &set)
        .unwrap();
    let reopened = reopen(&mut cfb);
    assert_eq!(
        reopened
            .read_property_set(&[SUMMARY_INFORMATION_STREAM])
            .unwrap(),
        set
    );
}
