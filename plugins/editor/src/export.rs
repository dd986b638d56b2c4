//! Zip export of the whole project

use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use atelier_core::tree::FileTree;

use crate::EditorError;

/// File name used when the archive is written to disk or downloaded
pub const ARCHIVE_FILE_NAME: &str = "project.zip";

/// Build a zip archive with one entry per file at its full slash-joined path.
///
/// Folders are implied by entry paths and never written as entries of their own.
pub fn build_archive(tree: &FileTree) -> Result<(Vec<u8>, usize), EditorError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let files = tree.files();
    for (path, file) in &files {
        writer
            .start_file(path.as_str(), options)
            .map_err(|e| EditorError::Archive(format!("Failed to add {}: {}", path, e)))?;
        writer
            .write_all(file.content.as_bytes())
            .map_err(|e| EditorError::Archive(format!("Failed to write {}: {}", path, e)))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| EditorError::Archive(format!("Failed to finish archive: {}", e)))?;

    Ok((cursor.into_inner(), files.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::tree::FileNode;
    use std::io::Read;

    #[test]
    fn test_archive_entries_use_full_paths() {
        let tree = FileTree::from_nodes(vec![
            FileNode::file("a.html", "<p>a</p>"),
            FileNode::folder(
                "src",
                vec![
                    FileNode::file("b.css", "b{}"),
                    FileNode::folder("img", vec![FileNode::file("c.png", "png")]),
                    FileNode::folder("empty", vec![]),
                ],
            ),
        ]);

        let (bytes, count) = build_archive(&tree).unwrap();
        assert_eq!(count, 3);

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["a.html", "src/b.css", "src/img/c.png"]);

        let mut content = String::new();
        archive
            .by_name("src/img/c.png")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "png");
    }
}
