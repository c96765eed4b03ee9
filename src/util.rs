//! Utility functions for filesystem durability and log hygiene

use std::{fs::File, io, path::Path};

/// Flushes directory metadata so a preceding rename survives power loss.
#[cfg(unix)]
pub fn fsync_dir(dir: &Path) -> io::Result<()> {
   File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub fn fsync_dir(_dir: &Path) -> io::Result<()> {
   Ok(())
}

/// Crash-injection hook. Compiled to a no-op without the `failpoints`
/// feature.
#[cfg(feature = "failpoints")]
pub fn fail_point(name: &str) -> io::Result<()> {
   fail::fail_point!(name, |_| Err(io::Error::other(format!("failpoint {name} triggered"))));
   Ok(())
}

#[cfg(not(feature = "failpoints"))]
#[inline]
pub fn fail_point(_name: &str) -> io::Result<()> {
   Ok(())
}

/// Strips terminal control sequences from captured process output before it
/// is written to logs. Newlines and tabs are kept.
pub fn sanitize_output(input: &str) -> String {
   let mut out = String::with_capacity(input.len());
   let mut chars = input.chars().peekable();
   while let Some(c) = chars.next() {
      if c == '\u{1b}' {
         if chars.peek() == Some(&'[') {
            chars.next();
            while let Some(&next) = chars.peek() {
               chars.next();
               if next.is_ascii_alphabetic() {
                  break;
               }
            }
         }
         continue;
      }
      if c.is_control() && c != '\n' && c != '\t' {
         continue;
      }
      out.push(c);
   }
   out
}

/// Truncates captured output to at most `max` bytes on a char boundary.
pub fn truncate_output(input: &str, max: usize) -> &str {
   if input.len() <= max {
      return input;
   }
   let mut end = max;
   while !input.is_char_boundary(end) {
      end -= 1;
   }
   &input[..end]
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn truncate_respects_char_boundaries() {
      let s = "héllo";
      assert_eq!(truncate_output(s, 2), "h");
      assert_eq!(truncate_output(s, 64), s);
   }
}
