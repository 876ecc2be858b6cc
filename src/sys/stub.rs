use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "hidraw devices are only supported on Linux",
    )
}

pub fn find_hidraw(_vendor_id: u16, _product_id: u16) -> io::Result<Vec<PathBuf>> {
    Err(unsupported())
}

pub fn open_hidraw(_path: &Path) -> io::Result<File> {
    Err(unsupported())
}
