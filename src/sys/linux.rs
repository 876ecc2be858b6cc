use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

const HIDRAW_CLASS: &str = "/sys/class/hidraw";

/// Parse the `HID_ID=bus:vendor:product` line of a hidraw uevent file.
fn parse_hid_id(uevent: &str) -> Option<(u16, u16)> {
    let line = uevent.lines().find_map(|l| l.strip_prefix("HID_ID="))?;
    let mut parts = line.trim().split(':').skip(1);
    let vendor = u32::from_str_radix(parts.next()?, 16).ok()?;
    let product = u32::from_str_radix(parts.next()?, 16).ok()?;
    Some((vendor as u16, product as u16))
}

/// List `/dev/hidrawN` nodes whose USB ids match, sorted by node name.
pub fn find_hidraw(vendor_id: u16, product_id: u16) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(HIDRAW_CLASS)? {
        let entry = entry?;
        let uevent = match fs::read_to_string(entry.path().join("device").join("uevent")) {
            Ok(text) => text,
            Err(_) => continue,
        };
        if parse_hid_id(&uevent) == Some((vendor_id, product_id)) {
            found.push(Path::new("/dev").join(entry.file_name()));
        }
    }
    found.sort();
    Ok(found)
}

/// Open a hidraw node for reading and writing.
pub fn open_hidraw(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}
