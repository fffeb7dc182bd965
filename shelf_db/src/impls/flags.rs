use crate::MigrationFlags;

impl MigrationFlags {
    pub const CATEGORIES: u8 = 1 << 0;
    pub const CHAPTERS: u8 = 1 << 1;
    pub const TRACKING: u8 = 1 << 2;
    pub const CUSTOM_COVER: u8 = 1 << 3;

    const NAMES: [(u8, &'static str); 4] = [
        (Self::CATEGORIES, "categories"),
        (Self::CHAPTERS, "chapters"),
        (Self::TRACKING, "tracking"),
        (Self::CUSTOM_COVER, "custom_cover"),
    ];

    pub fn all() -> MigrationFlags {
        MigrationFlags(Self::CATEGORIES | Self::CHAPTERS | Self::TRACKING | Self::CUSTOM_COVER)
    }

    pub fn none() -> MigrationFlags {
        MigrationFlags(0)
    }

    pub fn from_bitfield(field: u8) -> MigrationFlags {
        MigrationFlags(field & Self::all().0)
    }

    pub fn as_bitfield(&self) -> u8 {
        self.0
    }

    pub fn with(self, flag: u8) -> MigrationFlags {
        MigrationFlags::from_bitfield(self.0 | flag)
    }

    pub fn categories(&self) -> bool {
        self.0 & Self::CATEGORIES > 0
    }

    pub fn chapters(&self) -> bool {
        self.0 & Self::CHAPTERS > 0
    }

    pub fn tracking(&self) -> bool {
        self.0 & Self::TRACKING > 0
    }

    pub fn custom_cover(&self) -> bool {
        self.0 & Self::CUSTOM_COVER > 0
    }
}

impl Default for MigrationFlags {
    fn default() -> Self {
        Self::all()
    }
}

impl TryFrom<Vec<String>> for MigrationFlags {
    type Error = String;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        let mut flags = MigrationFlags::none();
        for name in value {
            let bit = match name.to_lowercase().replace([' ', '-'], "_").as_str() {
                "categories" | "category" => Self::CATEGORIES,
                "chapters" | "chapter" | "history" => Self::CHAPTERS,
                "tracking" | "tracks" | "track" => Self::TRACKING,
                "custom_cover" | "cover" => Self::CUSTOM_COVER,
                _ => return Err(format!("invalid migration flag {name}")),
            };
            flags = flags.with(bit);
        }
        Ok(flags)
    }
}

impl std::fmt::Display for MigrationFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flags = Self::NAMES
            .iter()
            .filter(|(bit, _)| self.0 & bit > 0)
            .map(|(_, name)| *name)
            .collect::<Vec<_>>();
        write!(f, "{}", flags.join(", "))?;
        Ok(())
    }
}
