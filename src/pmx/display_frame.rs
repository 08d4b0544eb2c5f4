//! PMX 显示枠

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayFrameElement {
    Bone(i32),
    Morph(i32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayFrame {
    pub local_name: String,
    pub universal_name: String,
    /// 特殊枠（Root / 表情）
    pub special_flag: u8,
    pub elements: Vec<DisplayFrameElement>,
}
