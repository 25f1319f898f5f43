//! White-list and admin documents shared with the bot.
//!
//! Both files are read and written whole on every operation; the bot process
//! edits them too, so nothing is cached between commands.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const PLATE_PATTERN: &str = r"^[A-ZА-ЯЁ][0-9]{3}[A-ZА-ЯЁ]{2}[0-9]{2,3}$";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("{}: {source}", .path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("{}: invalid JSON: {source}", .path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},
	#[error("invalid plate format: {0}")]
	InvalidPlate(String),
	#[error("plate already listed: {0}")]
	DuplicatePlate(String),
	#[error("plate not found: {0}")]
	PlateNotFound(String),
	#[error("owner must not be empty")]
	EmptyOwner,
	#[error("admin already listed: {0}")]
	DuplicateAdmin(i64),
	#[error("admin not found: {0}")]
	AdminNotFound(i64),
	#[error("cannot remove the last admin")]
	LastAdmin,
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Car {
	pub plate: String,
	#[serde(default)]
	pub owner: String,
	#[serde(default)]
	pub brand: String,
	#[serde(default)]
	pub color: String,
	#[serde(default)]
	pub visits: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Whitelist {
	#[serde(default)]
	pub cars: Vec<Car>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Admins {
	#[serde(default)]
	pub admins: Vec<i64>,
}

pub fn normalize_plate(text: &str) -> String {
	text.to_uppercase().chars().filter(|c| !c.is_whitespace()).collect()
}

pub fn valid_plate(plate: &str) -> bool {
	static PLATE_RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
	matches!(PLATE_RE.get_or_init(|| Regex::new(PLATE_PATTERN)), Ok(re) if re.is_match(plate))
}

#[derive(Debug, Clone)]
pub struct Store {
	whitelist: PathBuf,
	admins: PathBuf,
}

impl Store {
	pub fn new(whitelist: impl Into<PathBuf>, admins: impl Into<PathBuf>) -> Self {
		Self {
			whitelist: whitelist.into(),
			admins: admins.into(),
		}
	}

	/// Create empty documents for any file that does not exist yet.
	pub fn ensure_files(&self) -> Result<()> {
		if !self.whitelist.exists() {
			write_json(&self.whitelist, &Whitelist::default())?;
		}
		if !self.admins.exists() {
			write_json(&self.admins, &Admins::default())?;
		}
		Ok(())
	}

	pub fn cars(&self) -> Result<Vec<Car>> {
		Ok(read_json::<Whitelist>(&self.whitelist)?.cars)
	}

	pub fn add_plate(&self, plate: &str, owner: &str, brand: &str) -> Result<Car> {
		let plate = normalize_plate(plate);
		if !valid_plate(&plate) {
			return Err(StoreError::InvalidPlate(plate));
		}
		let owner = owner.trim();
		if owner.is_empty() {
			return Err(StoreError::EmptyOwner);
		}

		let mut doc: Whitelist = read_json(&self.whitelist)?;
		if doc.cars.iter().any(|c| c.plate.to_uppercase() == plate) {
			return Err(StoreError::DuplicatePlate(plate));
		}
		let car = Car {
			plate,
			owner: owner.to_string(),
			brand: brand.trim().to_string(),
			color: String::new(),
			visits: 0,
		};
		doc.cars.push(car.clone());
		write_json(&self.whitelist, &doc)?;
		Ok(car)
	}

	/// Remove by 1-based index (all digits) or by plate number.
	pub fn remove_plate(&self, key: &str) -> Result<Car> {
		let mut doc: Whitelist = read_json(&self.whitelist)?;
		let key = key.trim();

		let removed = if !key.is_empty() && key.chars().all(|c| c.is_ascii_digit()) {
			key.parse::<usize>()
				.ok()
				.filter(|idx| (1..=doc.cars.len()).contains(idx))
				.map(|idx| doc.cars.remove(idx - 1))
		} else {
			let plate = normalize_plate(key);
			let first = doc.cars.iter().position(|c| c.plate.to_uppercase() == plate);
			first.map(|idx| {
				let car = doc.cars.remove(idx);
				doc.cars.retain(|c| c.plate.to_uppercase() != plate);
				car
			})
		};
		let Some(removed) = removed else {
			return Err(StoreError::PlateNotFound(key.to_string()));
		};

		write_json(&self.whitelist, &doc)?;
		Ok(removed)
	}

	pub fn admins(&self) -> Result<Vec<i64>> {
		Ok(read_json::<Admins>(&self.admins)?.admins)
	}

	pub fn add_admin(&self, id: i64) -> Result<()> {
		let mut doc: Admins = read_json(&self.admins)?;
		if doc.admins.contains(&id) {
			return Err(StoreError::DuplicateAdmin(id));
		}
		doc.admins.push(id);
		write_json(&self.admins, &doc)
	}

	pub fn remove_admin(&self, id: i64) -> Result<()> {
		let mut doc: Admins = read_json(&self.admins)?;
		if !doc.admins.contains(&id) {
			return Err(StoreError::AdminNotFound(id));
		}
		if doc.admins.len() <= 1 {
			return Err(StoreError::LastAdmin);
		}
		doc.admins.retain(|a| *a != id);
		write_json(&self.admins, &doc)
	}
}

/// Missing files read as empty documents. A file that exists but does not
/// parse is an error, so a later write never clobbers it.
fn read_json<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
	let content = match std::fs::read_to_string(path) {
		Ok(content) => content,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
		Err(source) => {
			return Err(StoreError::Io {
				path: path.to_path_buf(),
				source,
			})
		}
	};
	serde_json::from_str(&content).map_err(|source| StoreError::Parse {
		path: path.to_path_buf(),
		source,
	})
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
	let io_err = |source| StoreError::Io {
		path: path.to_path_buf(),
		source,
	};
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		std::fs::create_dir_all(parent).map_err(io_err)?;
	}
	let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Parse {
		path: path.to_path_buf(),
		source,
	})?;
	std::fs::write(path, json).map_err(io_err)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	static COUNTER: AtomicU32 = AtomicU32::new(0);

	fn temp_store() -> (PathBuf, Store) {
		let n = COUNTER.fetch_add(1, Ordering::SeqCst);
		let dir = std::env::temp_dir().join(format!("safeyard-store-{}-{}", std::process::id(), n));
		let _ = std::fs::remove_dir_all(&dir);
		std::fs::create_dir_all(&dir).unwrap();
		let store = Store::new(dir.join("white_list.json"), dir.join("admins.json"));
		store.ensure_files().unwrap();
		(dir, store)
	}

	#[test]
	fn plate_normalization() {
		assert_eq!(normalize_plate(" a 123 bc 77 "), "A123BC77");
		assert_eq!(normalize_plate("в777ор199"), "В777ОР199");
	}

	#[test]
	fn plate_validation() {
		assert!(valid_plate("A123BC77"));
		assert!(valid_plate("В777ОР199"));
		assert!(!valid_plate("A123BC"));
		assert!(!valid_plate("AA23BC77"));
		assert!(!valid_plate("A123BC7777"));
		assert!(!valid_plate(""));
	}

	#[test]
	fn ensure_files_creates_empty_documents() {
		let (dir, store) = temp_store();
		let white = std::fs::read_to_string(dir.join("white_list.json")).unwrap();
		let admins = std::fs::read_to_string(dir.join("admins.json")).unwrap();
		assert!(white.contains("\"cars\""));
		assert!(admins.contains("\"admins\""));
		assert!(store.cars().unwrap().is_empty());
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[test]
	fn add_and_remove_plates() {
		let (dir, store) = temp_store();

		let car = store.add_plate("a123bc77", "Ivanov I.", "BMW X5").unwrap();
		assert_eq!(car.plate, "A123BC77");
		assert_eq!(car.visits, 0);
		store.add_plate("B456CD199", "Petrov", "").unwrap();

		assert!(matches!(store.add_plate("A123BC77", "Other", ""), Err(StoreError::DuplicatePlate(_))));
		assert!(matches!(store.add_plate("123", "Other", ""), Err(StoreError::InvalidPlate(_))));
		assert!(matches!(store.add_plate("C789EF77", "  ", ""), Err(StoreError::EmptyOwner)));

		let removed = store.remove_plate("b456cd199").unwrap();
		assert_eq!(removed.owner, "Petrov");
		let removed = store.remove_plate("1").unwrap();
		assert_eq!(removed.plate, "A123BC77");
		assert!(matches!(store.remove_plate("1"), Err(StoreError::PlateNotFound(_))));
		assert!(store.cars().unwrap().is_empty());

		let _ = std::fs::remove_dir_all(&dir);
	}

	#[test]
	fn admins_keep_at_least_one() {
		let (dir, store) = temp_store();

		store.add_admin(100).unwrap();
		assert!(matches!(store.add_admin(100), Err(StoreError::DuplicateAdmin(100))));
		assert!(matches!(store.remove_admin(100), Err(StoreError::LastAdmin)));
		assert!(matches!(store.remove_admin(7), Err(StoreError::AdminNotFound(7))));

		store.add_admin(200).unwrap();
		store.remove_admin(100).unwrap();
		assert_eq!(store.admins().unwrap(), vec![200]);

		let _ = std::fs::remove_dir_all(&dir);
	}

	#[test]
	fn corrupt_document_is_not_overwritten() {
		let (dir, store) = temp_store();
		std::fs::write(dir.join("admins.json"), "{not json").unwrap();

		assert!(matches!(store.add_admin(1), Err(StoreError::Parse { .. })));
		assert_eq!(std::fs::read_to_string(dir.join("admins.json")).unwrap(), "{not json");

		let _ = std::fs::remove_dir_all(&dir);
	}
}
