/// Declares a tuple-struct wrapper around a single inner type, with
/// `Deref`/`DerefMut`, `From<Inner>` and (when the inner type is an
/// `IntoIterator`) a pass-through `IntoIterator` impl.
///
/// Grounded on the teacher workspace's `utils::newtype!` macro, used
/// throughout `mempool::pool::store` for `Ancestors`, `Descendants`,
/// `Conflicts`, `DescendantScore` and `AncestorScore`.
#[macro_export]
macro_rules! newtype {
    ($(#[$meta:meta])* $vis:vis struct $name:ident($inner:ty);) => {
        $(#[$meta])*
        $vis struct $name(pub $inner);

        impl ::std::ops::Deref for $name {
            type Target = $inner;
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl ::std::ops::DerefMut for $name {
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.0
            }
        }

        impl From<$inner> for $name {
            fn from(inner: $inner) -> Self {
                Self(inner)
            }
        }

        impl IntoIterator for $name {
            type Item = <$inner as IntoIterator>::Item;
            type IntoIter = <$inner as IntoIterator>::IntoIter;
            fn into_iter(self) -> Self::IntoIter {
                self.0.into_iter()
            }
        }
    };
}
