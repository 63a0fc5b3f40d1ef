use anyhow::{Context, Result, bail};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::pipeline::PageJob;
use crate::report::PageReport;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
const UNSUPPORTED_ARCHIVES: &[&str] = &["7z", "rar", "cbr", "cb7"];

/// Pages found in the command-line inputs. Archive members are extracted
/// into temp dirs that live as long as this value.
#[derive(Debug, Default)]
pub struct CollectedInputs {
    pub jobs: Vec<PageJob>,
    pub rejected: Vec<PageReport>,
    extracted: Vec<TempDir>,
}

impl CollectedInputs {
    pub fn extracted_dirs(&self) -> usize {
        self.extracted.len()
    }
}

/// Expands files, folders (recursively) and ZIP archives into page jobs
/// whose outputs mirror the input layout under `output_dir`.
pub fn collect_inputs(inputs: &[PathBuf], output_dir: &Path) -> Result<CollectedInputs> {
    let mut collected = CollectedInputs::default();
    for input in inputs {
        let label = input.display().to_string();
        if !input.exists() {
            warn!("input not found: {}", label);
            collected
                .rejected
                .push(PageReport::failed(label, "input not found"));
            continue;
        }

        if input.is_dir() {
            let folder = output_dir.join(dir_name(input));
            for path in collect_directory_files(input)? {
                if !is_image(&path) {
                    continue;
                }
                let relative = path.strip_prefix(input).unwrap_or(&path);
                collected.jobs.push(PageJob {
                    label: path.display().to_string(),
                    output: folder.join(relative),
                    input: path.clone(),
                });
            }
            continue;
        }

        let ext = extension(input);
        if is_image(input) {
            collected.jobs.push(PageJob {
                label,
                output: output_dir.join(file_name(input)),
                input: input.clone(),
            });
        } else if ext == "zip" || ext == "cbz" {
            let temp = tempfile::tempdir()
                .with_context(|| "failed to create extraction directory")?;
            let members = match extract_zip(input, temp.path()) {
                Ok(members) => members,
                Err(err) => {
                    warn!("{}: {:#}", label, err);
                    collected
                        .rejected
                        .push(PageReport::failed(label, format!("{:#}", err)));
                    continue;
                }
            };
            info!("{}: extracted {} page(s)", label, members.len());
            let stem = input
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_else(|| "archive".to_string());
            for relative in members {
                collected.jobs.push(PageJob {
                    label: format!("{}:{}", label, relative.display()),
                    output: output_dir.join(&stem).join(&relative),
                    input: temp.path().join(&relative),
                });
            }
            collected.extracted.push(temp);
        } else if UNSUPPORTED_ARCHIVES.contains(&ext.as_str()) {
            collected.rejected.push(PageReport::failed(
                label,
                format!("unsupported archive format: {}", ext),
            ));
        } else {
            collected
                .rejected
                .push(PageReport::failed(label, "not an image or archive"));
        }
    }
    dedupe_outputs(&mut collected.jobs);
    Ok(collected)
}

/// Gives every job its own output path. A later job whose output is already
/// taken gets a `-2`, `-3`, ... suffix before the extension.
fn dedupe_outputs(jobs: &mut [PageJob]) {
    let mut taken: HashSet<PathBuf> = HashSet::new();
    for job in jobs.iter_mut() {
        if taken.insert(job.output.clone()) {
            continue;
        }
        let stem = job
            .output
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "page".to_string());
        let ext = job
            .output
            .extension()
            .map(|ext| ext.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut n = 2;
        let renamed = loop {
            let name = if ext.is_empty() {
                format!("{}-{}", stem, n)
            } else {
                format!("{}-{}.{}", stem, n, ext)
            };
            let candidate = job.output.with_file_name(name);
            if !taken.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        warn!(
            "{}: output {} already used, writing {}",
            job.label,
            job.output.display(),
            renamed.display()
        );
        taken.insert(renamed.clone());
        job.output = renamed;
    }
}

fn extract_zip(path: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let file =
        File::open(path).with_context(|| format!("failed to open archive: {}", path.display()))?;
    let mut archive = ZipArchive::new(file).with_context(|| "failed to read zip archive")?;
    let mut members = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| "failed to read zip entry")?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!("skipping zip entry outside the archive root: {}", entry.name());
            continue;
        };
        if !is_image(&relative) {
            debug!("skipping non-image zip entry: {}", relative.display());
            continue;
        }
        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut out = File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract {}", relative.display()))?;
        members.push(relative);
    }
    members.sort();
    Ok(members)
}

/// Bundles `files` into a ZIP at `dest`, naming entries relative to `base`.
pub fn create_zip(files: &[PathBuf], base: &Path, dest: &Path) -> Result<usize> {
    if let Some(parent) = dest.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file =
        File::create(dest).with_context(|| format!("failed to create {}", dest.display()))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in files {
        let name = path
            .strip_prefix(base)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(file_name(path)));
        let name = name.to_string_lossy().replace('\\', "/");
        let data =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        writer
            .start_file(name, options)
            .with_context(|| "failed to write zip entry")?;
        writer
            .write_all(&data)
            .with_context(|| "failed to write zip content")?;
    }
    writer.finish().with_context(|| "failed to finish zip")?;
    Ok(files.len())
}

/// Decodes a page and flattens any transparency onto white.
pub fn load_page(path: &Path) -> Result<RgbaImage> {
    let mut image = image::open(path)
        .with_context(|| format!("failed to decode image: {}", path.display()))?
        .into_rgba8();
    if image.width() == 0 || image.height() == 0 {
        bail!("image has no pixels: {}", path.display());
    }
    for pixel in image.pixels_mut() {
        let alpha = pixel[3] as u32;
        if alpha == 255 {
            continue;
        }
        for channel in 0..3 {
            let blended = pixel[channel] as u32 * alpha + 255 * (255 - alpha);
            pixel[channel] = ((blended + 127) / 255) as u8;
        }
        pixel[3] = 255;
    }
    Ok(image)
}

/// Encodes by the output extension: JPEG at `jpeg_quality`, PNG otherwise.
pub fn write_page(image: &RgbaImage, path: &Path, jpeg_quality: u8) -> Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match extension(path).as_str() {
        "jpg" | "jpeg" => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut encoder =
                JpegEncoder::new_with_quality(BufWriter::new(file), jpeg_quality.clamp(1, 100));
            encoder
                .encode_image(&rgb)
                .with_context(|| format!("failed to encode {}", path.display()))?;
        }
        _ => {
            image
                .save_with_format(path, ImageFormat::Png)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
    }
    Ok(())
}

pub(crate) fn collect_directory_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read directory: {}", dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| "failed to read directory entry")?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .with_context(|| "failed to read file type")?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Last component of a folder input; `.` and `..` resolve to the real name.
fn dir_name(path: &Path) -> String {
    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    resolved
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "pages".to_string())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "page.png".to_string())
}

fn is_image(path: &Path) -> bool {
    IMAGE_EXTENSIONS.contains(&extension(path).as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::io::Read;

    fn write_png(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("dir");
        }
        RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]))
            .save(path)
            .expect("png");
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = ZipWriter::new(File::create(path).expect("zip"));
        for (name, data) in entries {
            writer
                .start_file(*name, FileOptions::default())
                .expect("entry");
            writer.write_all(data).expect("data");
        }
        writer.finish().expect("finish");
    }

    #[test]
    fn folders_are_walked_recursively() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pages = dir.path().join("pages");
        write_png(&pages.join("01.png"));
        write_png(&pages.join("chapter/02.PNG"));
        std::fs::write(pages.join("notes.txt"), "skip").expect("txt");

        let out = dir.path().join("out");
        let collected = collect_inputs(&[pages.clone()], &out).expect("collect");
        assert!(collected.rejected.is_empty());
        let outputs: Vec<_> = collected.jobs.iter().map(|job| job.output.clone()).collect();
        assert_eq!(
            outputs,
            vec![out.join("pages/01.png"), out.join("pages/chapter/02.PNG")]
        );
    }

    #[test]
    fn same_page_names_in_different_inputs_get_distinct_outputs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ch1 = dir.path().join("ch1");
        let ch2 = dir.path().join("ch2");
        write_png(&ch1.join("001.png"));
        write_png(&ch2.join("001.png"));
        let loose_a = dir.path().join("a/cover.png");
        let loose_b = dir.path().join("b/cover.png");
        write_png(&loose_a);
        write_png(&loose_b);

        let out = dir.path().join("out");
        let collected =
            collect_inputs(&[ch1, ch2, loose_a, loose_b], &out).expect("collect");
        let outputs: Vec<_> = collected.jobs.iter().map(|job| job.output.clone()).collect();
        assert_eq!(
            outputs,
            vec![
                out.join("ch1/001.png"),
                out.join("ch2/001.png"),
                out.join("cover.png"),
                out.join("cover-2.png"),
            ]
        );
    }

    #[test]
    fn zip_members_are_extracted_and_mirrored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut png = Vec::new();
        RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]))
            .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .expect("encode");
        let archive = dir.path().join("book.zip");
        write_zip(
            &archive,
            &[
                ("p/001.png", png.as_slice()),
                ("readme.md", b"hi".as_slice()),
                ("../evil.png", png.as_slice()),
            ],
        );

        let out = dir.path().join("out");
        let collected = collect_inputs(&[archive], &out).expect("collect");
        assert_eq!(collected.jobs.len(), 1);
        assert_eq!(collected.extracted_dirs(), 1);
        let job = &collected.jobs[0];
        assert!(job.label.ends_with("book.zip:p/001.png"));
        assert_eq!(job.output, out.join("book/p/001.png"));
        assert!(load_page(&job.input).is_ok());
    }

    #[test]
    fn unsupported_inputs_are_reported_per_item() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rar = dir.path().join("book.rar");
        std::fs::write(&rar, b"Rar!").expect("rar");
        let collected = collect_inputs(
            &[rar, dir.path().join("missing.png")],
            &dir.path().join("out"),
        )
        .expect("collect");
        assert!(collected.jobs.is_empty());
        let messages: Vec<_> = collected
            .rejected
            .iter()
            .filter_map(|report| report.message.as_deref())
            .collect();
        assert_eq!(messages, vec!["unsupported archive format: rar", "input not found"]);
    }

    #[test]
    fn transparent_pixels_are_flattened_onto_white() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("alpha.png");
        RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0]))
            .save(&path)
            .expect("png");
        let image = load_page(&path).expect("load");
        assert_eq!(image.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn pages_are_written_in_their_format() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = RgbaImage::from_pixel(8, 8, Rgba([200, 100, 50, 255]));
        let png = dir.path().join("a/out.png");
        let jpg = dir.path().join("b/out.jpg");
        write_page(&image, &png, 95).expect("png");
        write_page(&image, &jpg, 95).expect("jpg");
        assert_eq!(
            image::ImageFormat::from_path(&png).expect("fmt"),
            ImageFormat::Png
        );
        let decoded = image::open(&jpg).expect("decode jpg").into_rgb8();
        assert_eq!(decoded.dimensions(), (8, 8));
        let bytes = std::fs::read(&jpg).expect("read");
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn zip_bundles_files_relative_to_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = dir.path().join("out");
        let first = base.join("01.png");
        let second = base.join("book/02.png");
        write_png(&first);
        write_png(&second);
        let dest = dir.path().join("bundle.zip");
        assert_eq!(create_zip(&[first, second], &base, &dest).expect("zip"), 2);

        let mut archive = ZipArchive::new(File::open(&dest).expect("open")).expect("read");
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["01.png", "book/02.png"]);
        let mut entry = archive.by_name("01.png").expect("entry");
        let mut data = Vec::new();
        entry.read_to_end(&mut data).expect("data");
        assert!(!data.is_empty());
    }
}
