/// Who opened a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSource {
    User,
    Agent,
}

pub const PLAIN_TEXT_LANGUAGE: &str = "plaintext";

const LANGUAGE_BY_EXTENSION: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("mjs", "javascript"),
    ("py", "python"),
    ("go", "go"),
    ("java", "java"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("cc", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("rb", "ruby"),
    ("php", "php"),
    ("swift", "swift"),
    ("kt", "kotlin"),
    ("json", "json"),
    ("toml", "toml"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("md", "markdown"),
    ("html", "html"),
    ("css", "css"),
    ("scss", "scss"),
    ("sql", "sql"),
    ("sh", "shell"),
    ("bash", "shell"),
    ("xml", "xml"),
];

#[must_use]
pub fn language_for_path(path: &str) -> &'static str {
    let name = display_name(path);
    let Some((stem, extension)) = name.rsplit_once('.') else {
        return PLAIN_TEXT_LANGUAGE;
    };
    if stem.is_empty() {
        return PLAIN_TEXT_LANGUAGE;
    }

    let extension = extension.to_ascii_lowercase();
    LANGUAGE_BY_EXTENSION
        .iter()
        .find(|(known, _)| *known == extension)
        .map_or(PLAIN_TEXT_LANGUAGE, |(_, language)| *language)
}

/// Last path segment, accepting either separator.
#[must_use]
pub fn display_name(path: &str) -> &str {
    path.rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorFile {
    path: String,
    name: String,
    language: &'static str,
    content: Option<String>,
    is_modified: bool,
    source: FileSource,
}

impl EditorFile {
    fn new(path: &str, source: FileSource) -> Self {
        Self {
            path: path.to_string(),
            name: display_name(path).to_string(),
            language: language_for_path(path),
            content: None,
            is_modified: false,
            source,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn language(&self) -> &'static str {
        self.language
    }

    /// `None` until the backend has delivered the file.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.is_modified
    }

    #[must_use]
    pub fn source(&self) -> FileSource {
        self.source
    }
}

/// Open files keyed by unique path, plus the active selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditorState {
    files: Vec<EditorFile>,
    active: Option<usize>,
}

impl EditorState {
    #[must_use]
    pub fn files(&self) -> &[EditorFile] {
        &self.files
    }

    #[must_use]
    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    #[must_use]
    pub fn active_file(&self) -> Option<&EditorFile> {
        self.active.and_then(|index| self.files.get(index))
    }

    #[must_use]
    pub fn find(&self, path: &str) -> Option<usize> {
        self.files.iter().position(|file| file.path == path)
    }

    #[must_use]
    pub fn file(&self, path: &str) -> Option<&EditorFile> {
        self.find(path).map(|index| &self.files[index])
    }

    /// Opens `path` or activates it when already open. Returns its index.
    ///
    /// An already-open file keeps its original source.
    pub fn open_file(&mut self, path: &str, source: FileSource) -> usize {
        let index = match self.find(path) {
            Some(index) => index,
            None => {
                self.files.push(EditorFile::new(path, source));
                self.files.len() - 1
            }
        };

        self.active = Some(index);
        index
    }

    /// Closes the file at `index`; out-of-range indices are ignored.
    pub fn close_file(&mut self, index: usize) {
        if index >= self.files.len() {
            return;
        }

        self.files.remove(index);

        if self.files.is_empty() {
            self.active = None;
            return;
        }

        let last = self.files.len() - 1;
        self.active = self.active.map(|active| {
            let shifted = if index <= active {
                active.saturating_sub(1)
            } else {
                active
            };
            shifted.min(last)
        });
    }

    pub fn set_active_file(&mut self, index: usize) {
        if index < self.files.len() {
            self.active = Some(index);
        }
    }

    /// Local edit. Marks the file modified.
    pub fn update_file_content(&mut self, index: usize, content: impl Into<String>) {
        if let Some(file) = self.files.get_mut(index) {
            file.content = Some(content.into());
            file.is_modified = true;
        }
    }

    pub fn mark_file_saved(&mut self, index: usize) {
        if let Some(file) = self.files.get_mut(index) {
            file.is_modified = false;
        }
    }

    /// Stores content read from the backend.
    ///
    /// Local modifications are kept unless `force` is set. Returns true when
    /// the content was applied.
    pub fn set_loaded_content(&mut self, path: &str, content: String, force: bool) -> bool {
        let Some(index) = self.find(path) else {
            return false;
        };

        let file = &mut self.files[index];
        if file.is_modified && !force {
            return false;
        }

        file.content = Some(content);
        file.is_modified = false;
        true
    }
}
