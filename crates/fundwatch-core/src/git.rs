use std::path::{Component, Path};

/// Read-only view of the repository that mirrors the published dataset.
pub struct GitContext {
    repo: gix::Repository,
}

impl GitContext {
    pub fn open(workspace: &Path) -> Option<Self> {
        gix::discover(workspace).ok().map(|repo| Self { repo })
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.repo.workdir()
    }

    /// Contents of `path` as recorded in the `HEAD` commit, if tracked there.
    pub fn committed_file(&self, path: &Path) -> Option<Vec<u8>> {
        let git_path = self.repo_relative_git_path(path)?;
        let commit = self.repo.head_commit().ok()?;
        let tree = commit.tree().ok()?;
        let entry = tree.lookup_entry_by_path(git_path.as_str()).ok()??;
        let object = entry.object().ok()?;
        Some(object.detach().data)
    }

    fn repo_relative_git_path(&self, path: &Path) -> Option<String> {
        let relative_path = match self.repo.workdir() {
            Some(workdir) => {
                let absolute = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    workdir.join(path)
                };
                let workdir = workdir.canonicalize().unwrap_or_else(|_| workdir.to_path_buf());
                let absolute = absolute
                    .parent()
                    .and_then(|parent| parent.canonicalize().ok())
                    .zip(absolute.file_name())
                    .map(|(parent, name)| parent.join(name))
                    .unwrap_or(absolute);
                absolute.strip_prefix(&workdir).ok()?.to_path_buf()
            }
            None => {
                if path.is_absolute() {
                    return None;
                }
                path.to_path_buf()
            }
        };

        normalize_git_path(&relative_path)
    }
}

fn normalize_git_path(path: &Path) -> Option<String> {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(segment) => segments.push(segment.to_str()?.to_owned()),
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::normalize_git_path;

    #[test]
    fn git_paths_use_forward_slashes_and_reject_escapes() {
        assert_eq!(
            normalize_git_path(Path::new("./src/data/congressData.json")).as_deref(),
            Some("src/data/congressData.json")
        );
        assert_eq!(normalize_git_path(Path::new("../outside.json")), None);
        assert_eq!(normalize_git_path(Path::new(".")), None);
    }
}
