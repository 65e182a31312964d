//! Copy into a reserved destination:
//! - Copies to a hidden temp file in the destination directory (fsynced)
//! - Atomically renames temp -> dest, replacing the caller's own reservation
//! - The source is never touched; removing it is the caller's decision after verification

use std::fs;
use std::io;
use std::path::Path;

use super::atomic::try_atomic_move;
use super::{io_copy, util};

pub fn copy_into_place(src: &Path, dest: &Path) -> io::Result<u64> {
    let dest_dir = dest.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("destination has no parent: {}", dest.display()),
        )
    })?;

    let tmp_path = util::unique_temp_path(dest_dir);

    let bytes = match io_copy::copy_streaming(src, &tmp_path) {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
    };

    if let Err(e) = try_atomic_move(&tmp_path, dest) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn replaces_reservation_and_leaves_no_temp() {
        let td = tempdir().unwrap();
        let src = td.path().join("src.bin");
        fs::write(&src, b"payload").unwrap();
        let dest_dir = td.path().join("out");
        fs::create_dir_all(&dest_dir).unwrap();
        let dest = dest_dir.join("a.bin");
        fs::File::create(&dest).unwrap();

        assert_eq!(copy_into_place(&src, &dest).unwrap(), 7);
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
        assert!(src.exists(), "source must be left alone");
        let leftovers = fs::read_dir(&dest_dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| util::is_temp_name(&e.path()))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn missing_source_cleans_temp() {
        let td = tempdir().unwrap();
        let dest = td.path().join("a.bin");
        let err = copy_into_place(&td.path().join("missing"), &dest).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(fs::read_dir(td.path()).unwrap().count(), 0);
    }
}
