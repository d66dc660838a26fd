/// One of the two eyes of a head-mounted display.
///
/// The compositor pairs submitted images by this identity, not by the order
/// in which they arrive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    /// Both eyes in the fixed order the presenter renders and submits them.
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn as_str(self) -> &'static str {
        match self {
            Eye::Left => "left",
            Eye::Right => "right",
        }
    }
}

impl std::fmt::Display for Eye {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value held once per eye.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EyePair<T> {
    pub left: T,
    pub right: T,
}

impl<T> EyePair<T> {
    pub fn new(left: T, right: T) -> Self {
        Self { left, right }
    }

    /// Builds a pair by calling `f` for the left eye, then the right eye.
    pub fn from_fn(mut f: impl FnMut(Eye) -> T) -> Self {
        let left = f(Eye::Left);
        let right = f(Eye::Right);
        Self { left, right }
    }

    pub fn get(&self, eye: Eye) -> &T {
        match eye {
            Eye::Left => &self.left,
            Eye::Right => &self.right,
        }
    }

    pub fn get_mut(&mut self, eye: Eye) -> &mut T {
        match eye {
            Eye::Left => &mut self.left,
            Eye::Right => &mut self.right,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_fn_visits_left_first() {
        let mut order = Vec::new();
        let pair = EyePair::from_fn(|eye| {
            order.push(eye);
            eye.as_str().len()
        });
        assert_eq!(order, vec![Eye::Left, Eye::Right]);
        assert_eq!(pair, EyePair::new(4, 5));
    }

    #[test]
    fn get_mut_targets_the_named_eye() {
        let mut pair = EyePair::new(0, 0);
        *pair.get_mut(Eye::Right) += 3;
        assert_eq!(*pair.get(Eye::Left), 0);
        assert_eq!(*pair.get(Eye::Right), 3);
    }
}
