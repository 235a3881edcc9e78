//! Object Graph Reader.
//!
//! Read-only accessor over the git object store. All layers above this
//! module (builder, query engine) go through this API and never touch git2
//! directly. Nothing here mutates the repository; content changes arrive
//! through external version-control tooling.
//!
//! Expected tree layout under the published ref:
//!
//! ```text
//! page/
//!   <page-name>/
//!     page.md
//!     attachment/
//!       <attachment-name>/
//!         metadata.md
//!         data
//! ```

use git2::{Delta, DiffFindOptions, DiffOptions, ObjectType, Oid, Sort};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset};

use crate::error::{BuildError, BuildResult};

/// Name of the pages subtree under the commit root.
pub const PAGES_TREE: &str = "page";
/// Fixed filename of a page's markup body inside its directory.
pub const PAGE_FILE: &str = "page.md";
/// Name of the attachments subtree inside a page directory.
pub const ATTACHMENTS_TREE: &str = "attachment";
/// Fixed filename of an attachment's metadata document.
pub const ATTACHMENT_METADATA: &str = "metadata.md";
/// Fixed filename of an attachment's raw bytes.
pub const ATTACHMENT_DATA: &str = "data";

/// One page as found in the current tree.
#[derive(Debug, Clone)]
pub struct PageHead {
    /// Directory name under `page/`.
    pub name: String,
    /// Tree path of the page directory, e.g. `page/sample-page`.
    pub dir_path: String,
    /// Tree path of the markup body, e.g. `page/sample-page/page.md`.
    pub body_path: String,
    pub dir_tree_id: Oid,
    pub body_blob_id: Oid,
}

/// An attachment located in some page or revision tree.
#[derive(Debug, Clone)]
pub struct AttachmentRef {
    /// Directory name under `attachment/`.
    pub name: String,
    /// Hash of the attachment's own subtree (its identity).
    pub tree_id: Oid,
    pub data_blob_id: Oid,
    pub metadata_blob_id: Oid,
    /// Actual size of the data blob in bytes.
    pub data_len: u64,
}

/// Commit metadata plus the page location effective at that commit.
#[derive(Debug, Clone)]
pub struct RevisionCommit {
    pub commit_id: Oid,
    pub tree_id: Oid,
    pub author: String,
    pub committer: String,
    pub author_time: DateTime<FixedOffset>,
    pub commit_time: DateTime<FixedOffset>,
    pub message: String,
    /// Page directory path at this commit (may differ from the current one
    /// when the page has been moved).
    pub dir_path: String,
    /// Markup body path at this commit.
    pub body_path: String,
}

/// The page body and attachments of one page directory as of one commit.
#[derive(Debug, Clone)]
pub struct RevisionSource {
    pub body_blob_id: Oid,
    pub attachments: Vec<AttachmentRef>,
}

/// Read-only handle on the object store, with a per-instance blob cache.
///
/// Blob loads are pure and content-addressed, so the cache is valid for the
/// lifetime of one build (or one query snapshot).
pub struct PageRepository {
    repo: git2::Repository,
    blob_cache: RefCell<HashMap<Oid, Arc<[u8]>>>,
}

impl std::fmt::Debug for PageRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRepository")
            .field("path", &self.repo.path())
            .finish()
    }
}

impl PageRepository {
    pub fn open(path: &Path) -> BuildResult<Self> {
        let repo = git2::Repository::open(path)?;
        Ok(Self {
            repo,
            blob_cache: RefCell::new(HashMap::new()),
        })
    }

    fn head_commit(&self, refname: &str) -> BuildResult<git2::Commit<'_>> {
        let object = self
            .repo
            .revparse_single(refname)
            .map_err(|_| BuildError::RefNotFound(refname.to_string()))?;
        object
            .peel_to_commit()
            .map_err(|_| BuildError::RefNotFound(refname.to_string()))
    }

    /// Resolve `refname` to its commit and descend into the `page/` subtree.
    fn pages_root(&self, refname: &str) -> BuildResult<git2::Tree<'_>> {
        let commit = self.head_commit(refname)?;
        let root = commit.tree()?;
        let entry = root.get_name(PAGES_TREE).ok_or_else(|| {
            BuildError::structure(PAGES_TREE, "pages subtree is absent from the commit root")
        })?;
        if entry.kind() != Some(ObjectType::Tree) {
            return Err(BuildError::structure(PAGES_TREE, "pages entry is not a tree"));
        }
        Ok(self.repo.find_tree(entry.id())?)
    }

    /// Enumerate the pages under `refname`.
    ///
    /// The outer result fails on ref or layout problems; each inner result
    /// is one page, failing individually when its directory lacks `page.md`
    /// so the builder can apply its abort/skip policy.
    pub fn list_pages(&self, refname: &str) -> BuildResult<Vec<BuildResult<PageHead>>> {
        let pages_root = self.pages_root(refname)?;

        let mut pages = Vec::new();
        for entry in pages_root.iter() {
            if entry.kind() != Some(ObjectType::Tree) {
                continue;
            }
            let name = match entry.name() {
                Some(name) => name.to_string(),
                None => continue,
            };
            let dir_path = format!("{}/{}", PAGES_TREE, name);
            pages.push(self.page_head(&name, &dir_path, entry.id()));
        }

        // Deterministic build order regardless of tree iteration details.
        pages.sort_by(|a, b| {
            let key = |r: &BuildResult<PageHead>| match r {
                Ok(head) => head.dir_path.clone(),
                Err(err) => err.to_string(),
            };
            key(a).cmp(&key(b))
        });

        Ok(pages)
    }

    fn page_head(&self, name: &str, dir_path: &str, dir_tree_id: Oid) -> BuildResult<PageHead> {
        let dir_tree = self.repo.find_tree(dir_tree_id)?;
        let body = dir_tree.get_name(PAGE_FILE).ok_or_else(|| {
            BuildError::structure(dir_path, format!("page directory has no {}", PAGE_FILE))
        })?;
        if body.kind() != Some(ObjectType::Blob) {
            return Err(BuildError::structure(
                dir_path,
                format!("{} entry is not a blob", PAGE_FILE),
            ));
        }
        Ok(PageHead {
            name: name.to_string(),
            dir_path: dir_path.to_string(),
            body_path: format!("{}/{}", dir_path, PAGE_FILE),
            dir_tree_id,
            body_blob_id: body.id(),
        })
    }

    /// Load blob content by hash. Cached for the lifetime of this handle.
    pub fn load_blob(&self, oid: Oid) -> Result<Arc<[u8]>, git2::Error> {
        if let Some(bytes) = self.blob_cache.borrow().get(&oid) {
            return Ok(Arc::clone(bytes));
        }
        let blob = self.repo.find_blob(oid)?;
        let bytes: Arc<[u8]> = Arc::from(blob.content());
        self.blob_cache
            .borrow_mut()
            .insert(oid, Arc::clone(&bytes));
        Ok(bytes)
    }

    /// Locate the attachments of a page directory tree.
    ///
    /// A missing `attachment/` subtree yields an empty list; a child subtree
    /// missing either of its two fixed entries is a structure error.
    pub fn load_attachments(
        &self,
        dir_tree_id: Oid,
        owner_path: &str,
    ) -> BuildResult<Vec<AttachmentRef>> {
        let dir_tree = self.repo.find_tree(dir_tree_id)?;
        let attachments_entry = match dir_tree.get_name(ATTACHMENTS_TREE) {
            Some(entry) if entry.kind() == Some(ObjectType::Tree) => entry,
            Some(_) => {
                return Err(BuildError::structure(
                    owner_path,
                    format!("{} entry is not a tree", ATTACHMENTS_TREE),
                ))
            }
            None => return Ok(Vec::new()),
        };

        let attachments_tree = self.repo.find_tree(attachments_entry.id())?;
        let mut attachments = Vec::new();

        for entry in attachments_tree.iter() {
            let entry_name = entry.name().unwrap_or("?").to_string();
            let attachment_path =
                format!("{}/{}/{}", owner_path, ATTACHMENTS_TREE, entry_name);
            if entry.kind() != Some(ObjectType::Tree) {
                return Err(BuildError::structure(
                    attachment_path,
                    "attachment entry is not a tree",
                ));
            }
            let tree = self.repo.find_tree(entry.id())?;

            let metadata = tree.get_name(ATTACHMENT_METADATA).ok_or_else(|| {
                BuildError::structure(
                    attachment_path.as_str(),
                    format!("attachment has no {}", ATTACHMENT_METADATA),
                )
            })?;
            let data = tree.get_name(ATTACHMENT_DATA).ok_or_else(|| {
                BuildError::structure(
                    attachment_path.as_str(),
                    format!("attachment has no {}", ATTACHMENT_DATA),
                )
            })?;

            let data_len = self.repo.find_blob(data.id())?.size() as u64;

            attachments.push(AttachmentRef {
                name: entry_name,
                tree_id: entry.id(),
                data_blob_id: data.id(),
                metadata_blob_id: metadata.id(),
                data_len,
            });
        }

        Ok(attachments)
    }

    /// Walk the commits of `refname` that changed `dir_path`, newest first,
    /// following renames of the page directory back through history.
    ///
    /// Streaming: history can be arbitrarily long, so commits are resolved
    /// one `next()` at a time.
    pub fn history<'repo>(
        &'repo self,
        refname: &str,
        dir_path: &str,
    ) -> BuildResult<HistoryWalk<'repo>> {
        let head = self.head_commit(refname)?;
        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TIME)?;
        revwalk.push(head.id())?;

        Ok(HistoryWalk {
            repo: &self.repo,
            revwalk,
            tracked_dir: dir_path.to_string(),
        })
    }

    /// Resolve one revision's page body and attachments by re-walking the
    /// commit's tree down to the paths effective at that commit.
    pub fn revision_source(&self, revision: &RevisionCommit) -> BuildResult<RevisionSource> {
        let commit = self.repo.find_commit(revision.commit_id)?;
        let tree = commit.tree()?;

        let body = tree
            .get_path(Path::new(&revision.body_path))
            .map_err(|_| {
                BuildError::structure(
                    revision.body_path.as_str(),
                    format!("page body absent from commit {}", revision.commit_id),
                )
            })?;

        let dir = tree.get_path(Path::new(&revision.dir_path)).map_err(|_| {
            BuildError::structure(
                revision.dir_path.as_str(),
                format!("page directory absent from commit {}", revision.commit_id),
            )
        })?;

        let attachments = self.load_attachments(dir.id(), &revision.dir_path)?;

        Ok(RevisionSource {
            body_blob_id: body.id(),
            attachments,
        })
    }
}

/// Streaming iterator over the commits that changed one page directory.
pub struct HistoryWalk<'repo> {
    repo: &'repo git2::Repository,
    revwalk: git2::Revwalk<'repo>,
    /// Page directory path effective at the commits not yet visited.
    /// Re-anchored when a rename is crossed.
    tracked_dir: String,
}

impl HistoryWalk<'_> {
    fn advance(&mut self) -> Result<Option<RevisionCommit>, git2::Error> {
        while let Some(oid) = self.revwalk.next() {
            let oid = oid?;
            let commit = self.repo.find_commit(oid)?;
            let tree = commit.tree()?;

            let current_id = subtree_id(&tree, &self.tracked_dir);
            let Some(current_id) = current_id else {
                // The page does not exist at this commit (unrelated branch,
                // or before its introduction under this name).
                continue;
            };

            // Treesame to any parent means this commit did not change the
            // page; root commits count as changed when the page is present.
            let mut treesame = false;
            let mut absent_parent: Option<git2::Commit<'_>> = None;
            for parent in commit.parents() {
                match subtree_id(&parent.tree()?, &self.tracked_dir) {
                    Some(id) if id == current_id => {
                        treesame = true;
                        break;
                    }
                    Some(_) => {}
                    None => absent_parent = Some(parent),
                }
            }
            if treesame {
                continue;
            }

            let revision = RevisionCommit {
                commit_id: commit.id(),
                tree_id: tree.id(),
                author: format_signature(&commit.author()),
                committer: format_signature(&commit.committer()),
                author_time: signature_time(&commit.author()),
                commit_time: commit_time(&commit),
                message: commit.message().unwrap_or("").to_string(),
                dir_path: self.tracked_dir.clone(),
                body_path: format!("{}/{}", self.tracked_dir, PAGE_FILE),
            };

            // The directory first appears here relative to some parent: if
            // it arrived by rename, re-anchor the tracked path so older
            // commits keep matching.
            if let Some(parent) = absent_parent {
                if let Some(old_dir) = self.renamed_from(&parent.tree()?, &tree)? {
                    self.tracked_dir = old_dir;
                }
            }

            return Ok(Some(revision));
        }
        Ok(None)
    }

    /// Detect whether the tracked page body arrived at its current path via
    /// rename in the `parent_tree` → `tree` step; returns the old directory.
    fn renamed_from(
        &self,
        parent_tree: &git2::Tree<'_>,
        tree: &git2::Tree<'_>,
    ) -> Result<Option<String>, git2::Error> {
        let mut opts = DiffOptions::new();
        let mut diff =
            self.repo
                .diff_tree_to_tree(Some(parent_tree), Some(tree), Some(&mut opts))?;
        let mut find = DiffFindOptions::new();
        find.renames(true);
        diff.find_similar(Some(&mut find))?;

        let body_path = PathBuf::from(&self.tracked_dir).join(PAGE_FILE);
        for delta in diff.deltas() {
            if delta.status() != Delta::Renamed {
                continue;
            }
            let Some(new_path) = delta.new_file().path() else {
                continue;
            };
            if new_path != body_path {
                continue;
            }
            if let Some(old_dir) = delta.old_file().path().and_then(|p| p.parent()) {
                return Ok(Some(old_dir.to_string_lossy().into_owned()));
            }
        }
        Ok(None)
    }
}

impl Iterator for HistoryWalk<'_> {
    type Item = Result<RevisionCommit, git2::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}

fn subtree_id(tree: &git2::Tree<'_>, path: &str) -> Option<Oid> {
    tree.get_path(Path::new(path)).ok().map(|entry| entry.id())
}

fn format_signature(sig: &git2::Signature<'_>) -> String {
    format!(
        "{} <{}>",
        sig.name().unwrap_or(""),
        sig.email().unwrap_or("")
    )
}

fn signature_time(sig: &git2::Signature<'_>) -> DateTime<FixedOffset> {
    git_time_to_datetime(sig.when())
}

fn commit_time(commit: &git2::Commit<'_>) -> DateTime<FixedOffset> {
    git_time_to_datetime(commit.committer().when())
}

fn git_time_to_datetime(time: git2::Time) -> DateTime<FixedOffset> {
    let offset =
        FixedOffset::east_opt(time.offset_minutes() * 60).unwrap_or_else(|| chrono::Utc.fix());
    DateTime::from_timestamp(time.seconds(), 0)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .with_timezone(&offset)
}
