//! Editable draft of a project's class list.
//!
//! Changes stay local until [`ClassEditor::save`]; rejected edits leave the
//! draft untouched and report an inline message.

use crate::model::Project;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassEditError {
    #[error("Class name cannot be empty")]
    Empty,

    #[error("Class already exists")]
    Duplicate,

    #[error("Cannot delete default class!")]
    DeleteDefault,

    #[error("Cannot delete last class!")]
    DeleteLast,

    #[error("Unknown class")]
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassEditor {
    classes: Vec<String>,
    default_class: String,
}

impl ClassEditor {
    pub fn from_project(project: &Project) -> Self {
        Self {
            classes: project.classes.clone(),
            default_class: project.default_class.clone(),
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn default_class(&self) -> &str {
        &self.default_class
    }

    pub fn add(&mut self, name: &str) -> Result<(), ClassEditError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClassEditError::Empty);
        }
        if self.classes.iter().any(|c| c == name) {
            return Err(ClassEditError::Duplicate);
        }
        self.classes.push(name.to_string());
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<(), ClassEditError> {
        if name == self.default_class {
            return Err(ClassEditError::DeleteDefault);
        }
        if self.classes.len() <= 1 {
            return Err(ClassEditError::DeleteLast);
        }
        let before = self.classes.len();
        self.classes.retain(|c| c != name);
        if self.classes.len() == before {
            return Err(ClassEditError::Unknown);
        }
        Ok(())
    }

    pub fn set_default(&mut self, name: &str) -> Result<(), ClassEditError> {
        if !self.classes.iter().any(|c| c == name) {
            return Err(ClassEditError::Unknown);
        }
        self.default_class = name.to_string();
        Ok(())
    }

    /// Throw away local edits.
    pub fn discard(&mut self, project: &Project) {
        *self = Self::from_project(project);
    }

    /// The draft as a `(classes, default_class)` pair ready to send.
    pub fn save(&self) -> (Vec<String>, String) {
        (self.classes.clone(), self.default_class.clone())
    }

    pub fn differs_from(&self, project: &Project) -> bool {
        self.classes != project.classes || self.default_class != project.default_class
    }
}
