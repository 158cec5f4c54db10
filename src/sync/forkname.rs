use regex::Regex;

/// Allocates alternate bookmark names of the form `<base>-<host>` and
/// `<base>-<host>-<n>` for local bookmarks that lost a conflict.
#[derive(Debug, Clone)]
pub struct ForkNamer {
	hostname: String,
	suffix: Regex,
}

impl ForkNamer {
	pub fn new(hostname: impl Into<String>) -> Self {
		let hostname = hostname.into();
		let pattern = format!("-{}(?:-[0-9]+)?$", regex::escape(&hostname));
		let suffix = Regex::new(&pattern).expect("escaped hostname forms a valid pattern");
		Self { hostname, suffix }
	}

	pub fn hostname(&self) -> &str {
		&self.hostname
	}

	/// Strip a fork suffix left by an earlier fork on this host, so forking
	/// `foo-host-0` again yields `foo-host-<n>` rather than
	/// `foo-host-0-host`.
	pub fn base_name<'a>(&self, name: &'a str) -> &'a str {
		match self.suffix.find(name) {
			Some(m) => &name[..m.start()],
			None => name,
		}
	}

	/// First free fork name for `name`. `is_taken` must report every name
	/// already in use or already allocated in the current batch.
	pub fn fork_name(&self, name: &str, is_taken: impl Fn(&str) -> bool) -> String {
		let base = self.base_name(name);
		let candidate = format!("{}-{}", base, self.hostname);
		if !is_taken(&candidate) {
			return candidate;
		}
		let mut n: u64 = 0;
		loop {
			let candidate = format!("{}-{}-{}", base, self.hostname, n);
			if !is_taken(&candidate) {
				return candidate;
			}
			n += 1;
		}
	}
}
