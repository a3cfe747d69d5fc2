//! In-memory EPUB builder shared by the integration suites.

#![allow(dead_code)]

const CONTAINER_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="{opf}" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

/// A manifest item to be written into the OPF
pub struct Item {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub data: Option<Vec<u8>>,
}

/// Fluent builder for small EPUB archives
pub struct EpubFixture {
    opf_path: String,
    title: Option<String>,
    creator: Option<String>,
    language: Option<String>,
    items: Vec<Item>,
    spine: Vec<String>,
    with_container: bool,
    with_mimetype: bool,
    deflate: bool,
    extra: Vec<(String, Vec<u8>)>,
}

impl Default for EpubFixture {
    fn default() -> Self {
        Self {
            opf_path: "OEBPS/content.opf".to_string(),
            title: None,
            creator: None,
            language: None,
            items: Vec::new(),
            spine: Vec::new(),
            with_container: true,
            with_mimetype: true,
            deflate: true,
            extra: Vec::new(),
        }
    }
}

impl EpubFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opf_path(mut self, path: &str) -> Self {
        self.opf_path = path.to_string();
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn creator(mut self, creator: &str) -> Self {
        self.creator = Some(creator.to_string());
        self
    }

    pub fn language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    /// Add an XHTML chapter to the manifest and the spine.
    pub fn chapter(mut self, id: &str, href: &str, body: &str) -> Self {
        let html = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>{id}</title></head>\
             <body>{body}</body></html>"
        );
        self.items.push(Item {
            id: id.to_string(),
            href: href.to_string(),
            media_type: "application/xhtml+xml".to_string(),
            data: Some(html.into_bytes()),
        });
        self.spine.push(id.to_string());
        self
    }

    /// Add a manifest item with its file.
    pub fn item(mut self, id: &str, href: &str, media_type: &str, data: &[u8]) -> Self {
        self.items.push(Item {
            id: id.to_string(),
            href: href.to_string(),
            media_type: media_type.to_string(),
            data: Some(data.to_vec()),
        });
        self
    }

    /// Add a manifest item whose file is absent from the archive.
    pub fn dangling_item(mut self, id: &str, href: &str, media_type: &str) -> Self {
        self.items.push(Item {
            id: id.to_string(),
            href: href.to_string(),
            media_type: media_type.to_string(),
            data: None,
        });
        self
    }

    /// Reference an id in the spine without adding a manifest item.
    pub fn spine_ref(mut self, idref: &str) -> Self {
        self.spine.push(idref.to_string());
        self
    }

    pub fn without_container(mut self) -> Self {
        self.with_container = false;
        self
    }

    pub fn without_mimetype(mut self) -> Self {
        self.with_mimetype = false;
        self
    }

    pub fn stored(mut self) -> Self {
        self.deflate = false;
        self
    }

    pub fn extra_file(mut self, path: &str, data: &[u8]) -> Self {
        self.extra.push((path.to_string(), data.to_vec()));
        self
    }

    pub fn opf(&self) -> String {
        let mut metadata = String::new();
        if let Some(title) = &self.title {
            metadata.push_str(&format!("<dc:title>{title}</dc:title>"));
        }
        if let Some(creator) = &self.creator {
            metadata.push_str(&format!("<dc:creator>{creator}</dc:creator>"));
        }
        if let Some(language) = &self.language {
            metadata.push_str(&format!("<dc:language>{language}</dc:language>"));
        }
        let manifest: String = self
            .items
            .iter()
            .map(|item| {
                format!(
                    "<item id=\"{}\" href=\"{}\" media-type=\"{}\"/>",
                    item.id, item.href, item.media_type
                )
            })
            .collect();
        let spine: String = self
            .spine
            .iter()
            .map(|idref| format!("<itemref idref=\"{idref}\"/>"))
            .collect();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <package xmlns=\"http://www.idpf.org/2007/opf\" version=\"3.0\">\
             <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">{metadata}</metadata>\
             <manifest>{manifest}</manifest><spine>{spine}</spine></package>"
        )
    }

    pub fn build(&self) -> Vec<u8> {
        let base_dir = self
            .opf_path
            .rsplit_once('/')
            .map(|(dir, _)| format!("{dir}/"))
            .unwrap_or_default();

        let mut files: Vec<(String, Vec<u8>, bool)> = Vec::new();
        if self.with_mimetype {
            files.push(("mimetype".to_string(), b"application/epub+zip".to_vec(), false));
        }
        if self.with_container {
            let container = CONTAINER_TEMPLATE.replace("{opf}", &self.opf_path);
            files.push((
                "META-INF/container.xml".to_string(),
                container.into_bytes(),
                self.deflate,
            ));
        }
        files.push((self.opf_path.clone(), self.opf().into_bytes(), self.deflate));
        for item in &self.items {
            if let Some(data) = &item.data {
                files.push((format!("{base_dir}{}", item.href), data.clone(), self.deflate));
            }
        }
        for (path, data) in &self.extra {
            files.push((path.clone(), data.clone(), self.deflate));
        }
        build_zip(&files)
    }
}

/// Write a ZIP archive with stored or deflated entries.
pub fn build_zip(files: &[(String, Vec<u8>, bool)]) -> Vec<u8> {
    let mut zip = Vec::new();
    let mut central = Vec::new();

    for (name, content, deflate) in files {
        let name_bytes = name.as_bytes();
        let crc = crc32fast::hash(content);
        let (method, payload) = if *deflate {
            (8u16, miniz_oxide::deflate::compress_to_vec(content, 6))
        } else {
            (0u16, content.clone())
        };
        let local_offset = zip.len() as u32;

        zip.extend_from_slice(&0x04034b50u32.to_le_bytes());
        zip.extend_from_slice(&20u16.to_le_bytes());
        zip.extend_from_slice(&0u16.to_le_bytes());
        zip.extend_from_slice(&method.to_le_bytes());
        zip.extend_from_slice(&0u32.to_le_bytes());
        zip.extend_from_slice(&crc.to_le_bytes());
        zip.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        zip.extend_from_slice(&(content.len() as u32).to_le_bytes());
        zip.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        zip.extend_from_slice(&0u16.to_le_bytes());
        zip.extend_from_slice(name_bytes);
        zip.extend_from_slice(&payload);

        central.extend_from_slice(&0x02014b50u32.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&method.to_le_bytes());
        central.extend_from_slice(&0u32.to_le_bytes());
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        central.extend_from_slice(&(content.len() as u32).to_le_bytes());
        central.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u32.to_le_bytes());
        central.extend_from_slice(&local_offset.to_le_bytes());
        central.extend_from_slice(name_bytes);
    }

    let cd_offset = zip.len() as u32;
    let cd_size = central.len() as u32;
    zip.extend_from_slice(&central);

    let count = files.len() as u16;
    zip.extend_from_slice(&0x06054b50u32.to_le_bytes());
    zip.extend_from_slice(&0u16.to_le_bytes());
    zip.extend_from_slice(&0u16.to_le_bytes());
    zip.extend_from_slice(&count.to_le_bytes());
    zip.extend_from_slice(&count.to_le_bytes());
    zip.extend_from_slice(&cd_size.to_le_bytes());
    zip.extend_from_slice(&cd_offset.to_le_bytes());
    zip.extend_from_slice(&0u16.to_le_bytes());
    zip
}

/// Three-chapter book with a cover image.
pub fn sample_book() -> Vec<u8> {
    EpubFixture::new()
        .title("The Sample")
        .creator("A. Writer")
        .language("fr")
        .chapter("c1", "text/one.xhtml", "<h1>Beginning</h1><p>It was a dark night.</p>")
        .chapter(
            "c2",
            "text/two.xhtml",
            "<p>Before the picture.</p><img src=\"../images/map.png\" alt=\"A map\"/><p>After.</p>",
        )
        .chapter("c3", "text/three.xhtml", "<p>The end.</p>")
        .item("map", "images/map.png", "image/png", b"\x89PNG map")
        .item("cover-img", "images/cover.jpg", "image/jpeg", b"\xff\xd8 cover")
        .build()
}
