/// The common accessor facade every tag format implements.
///
/// The convenience fields are projections onto each format's well-known keys
/// ("TITLE", "ARTIST", ...), not separate storage. Year and track use zero
/// for "not set"; setting zero removes the field where the format allows it.
pub trait Tag {
    fn title(&self) -> Option<String>;
    fn artist(&self) -> Option<String>;
    fn album(&self) -> Option<String>;
    fn comment(&self) -> Option<String>;
    fn genre(&self) -> Option<String>;
    fn year(&self) -> u32;
    fn track(&self) -> u32;

    fn set_title(&mut self, value: &str);
    fn set_artist(&mut self, value: &str);
    fn set_album(&mut self, value: &str);
    fn set_comment(&mut self, value: &str);
    fn set_genre(&mut self, value: &str);
    fn set_year(&mut self, value: u32);
    fn set_track(&mut self, value: u32);

    fn is_empty(&self) -> bool;

    /// Generic key/value view: every text field the tag stores, in the
    /// format's own key vocabulary.
    fn properties(&self) -> Vec<(String, Vec<String>)>;
    fn set_property(&mut self, key: &str, values: &[String]);
    fn remove_property(&mut self, key: &str);
}
