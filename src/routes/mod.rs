pub mod extraction;
pub mod ocr;
