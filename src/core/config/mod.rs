pub mod data;
pub mod io;

#[cfg(test)]
mod tests;
